//! Page path rules and hyperlink normalization.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    // Non-empty segments; the last one has no dot except an optional .htm/.html suffix.
    static ref PAGE_PATH: Regex = Regex::new(r"^(/[^/\s]+)*/[^/\s.]+(\.html?)?$").expect("valid regex");
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// `scheme://host[:port]` of a URL, the form sites are stored under.
pub fn site_root(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Strips trailing slashes; an empty result is the site root `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_page_path(path: &str) -> bool {
    path == "/" || PAGE_PATH.is_match(path)
}

/// Normalized page path of an absolute URL, if it names a crawlable page.
pub fn page_path(url: &Url) -> Option<String> {
    let path = normalize_path(url.path());
    is_page_path(&path).then_some(path)
}

/// Directory a page lives in; links found on the page must stay below it.
fn branch_prefix(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) if path != "/" => &path[..idx],
        _ => "",
    }
}

fn same_site(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Resolves `href` found on the page at `page_path` and returns its normalized
/// path when it points to another page of the same site and branch.
pub fn normalize_link(base: &Url, page_path: &str, href: &str) -> Option<String> {
    let page_url = base.join(page_path).ok()?;
    let mut url = page_url.join(href.trim()).ok()?;
    if !same_site(base, &url) {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);
    let path = normalize_path(url.path());
    let prefix = branch_prefix(page_path);
    if path == page_path || !path.starts_with(prefix) || !path[prefix.len()..].starts_with('/') {
        return None;
    }
    is_page_path(&path).then_some(path)
}

/// Distinct eligible links of a page, in document order.
pub fn extract_links(base: &Url, page_path: &str, html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let mut out: Vec<String> = Vec::new();
    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else { continue };
        if let Some(path) = normalize_link(base, page_path, href) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}
