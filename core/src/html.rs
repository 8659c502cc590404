use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};

lazy_static! {
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
}

const HIDDEN: &[&str] = &["script", "style", "noscript", "template"];
const HIDDEN_IN_BODY: &[&str] = &["script", "style", "noscript", "template", "title"];

/// Own text of every element, in document order, one entry per element.
///
/// Text of `script`/`style`-like elements is skipped. The `<title>` is kept.
pub fn own_texts(html: &str) -> Vec<String> {
    collect_own_texts(html, HIDDEN)
}

/// [`own_texts`] without the `<title>`, which hits report on their own.
pub fn body_texts(html: &str) -> Vec<String> {
    collect_own_texts(html, HIDDEN_IN_BODY)
}

fn collect_own_texts(html: &str, hidden: &[&str]) -> Vec<String> {
    let doc = Html::parse_document(html);
    doc.root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| !hidden.contains(&el.value().name()))
        .filter_map(|el| {
            let text = el
                .children()
                .filter_map(|c| c.value().as_text())
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!text.is_empty()).then_some(text)
        })
        .collect()
}

/// Text the indexer reads: every element's own text, title included.
pub fn visible_text(html: &str) -> String {
    own_texts(html).join(" ")
}

pub fn title(html: &str) -> String {
    let doc = Html::parse_document(html);
    doc.select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}
