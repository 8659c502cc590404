use async_trait::async_trait;
use parking_lot::Mutex;
use sitesearch_core::{IndexStatus, LemmaExtractor, NewPage, SledStore, Store};
use sitesearch_crawler::{FetchError, PageFetcher, Response};
use sitesearch_indexer::{IndexBuilder, IndexingError, IndexingService, Settings};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// In-memory site; unknown paths answer 404.
#[derive(Default)]
struct Fixture {
    pages: Mutex<HashMap<String, String>>,
    delay: Option<Duration>,
}

impl Fixture {
    fn with(pages: &[(&str, &str)]) -> Self {
        let map = pages.iter().map(|(p, b)| (p.to_string(), b.to_string())).collect();
        Self { pages: Mutex::new(map), delay: None }
    }

    fn set(&self, path: &str, body: &str) {
        self.pages.lock().insert(path.to_string(), body.to_string());
    }
}

#[async_trait]
impl PageFetcher for Fixture {
    async fn fetch(&self, url: &Url) -> Result<Response, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let body = self.pages.lock().get(url.path()).cloned();
        Ok(match body {
            Some(body) => Response { code: 200, body },
            None => Response { code: 404, body: String::new() },
        })
    }
}

const SETTINGS: &str = r#"
[[sites]]
url = "https://site.test"
name = "Site"

[crawl]
round_delay_ms = 0
"#;

fn frequency(store: &dyn Store, site: u64, lemma: &str) -> u32 {
    store.lemma(site, lemma).unwrap().map(|l| l.frequency).unwrap_or(0)
}

fn page(site: u64, path: &str, html: &str) -> NewPage {
    NewPage { site_id: site, path: path.to_string(), code: 200, content: html.to_string() }
}

fn service(fetcher: Arc<Fixture>) -> (Arc<SledStore>, IndexingService) {
    let store = Arc::new(SledStore::temporary().unwrap());
    let settings = Settings::from_toml(SETTINGS).unwrap();
    let service = IndexingService::new(store.clone() as Arc<dyn Store>, fetcher, settings).unwrap();
    (store, service)
}

#[test]
fn reindex_and_delete_conserve_frequencies() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let builder = IndexBuilder::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default());
    let site = store.site_or_create("https://site.test", "Site").unwrap();
    let token = CancellationToken::new();

    let first = builder.index_page(page(site.id, "/x", "<p>cats and dogs</p>"), &token).unwrap();
    assert_eq!(first.lemmas, 2);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 1);
    assert_eq!(frequency(store.as_ref(), site.id, "dog"), 1);

    let second = builder.index_page(page(site.id, "/x", "<p>cats and birds</p>"), &token).unwrap();
    assert_eq!(second.lemmas, 2);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 1);
    assert_eq!(frequency(store.as_ref(), site.id, "dog"), 0);
    assert_eq!(frequency(store.as_ref(), site.id, "bird"), 1);
    assert_eq!(store.count_pages(site.id).unwrap(), 1);
    assert_eq!(store.postings_for_page(second.page.id).unwrap().len(), 2);

    assert!(builder.remove_page(site.id, "/x").unwrap());
    assert!(!builder.remove_page(site.id, "/x").unwrap());
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 0);
    assert_eq!(frequency(store.as_ref(), site.id, "bird"), 0);
}

#[test]
fn failed_pages_are_stored_but_not_indexed() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let builder = IndexBuilder::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default());
    let site = store.site_or_create("https://site.test", "Site").unwrap();
    let broken = NewPage { code: 500, ..page(site.id, "/x", "<p>cats</p>") };

    let indexed = builder.index_page(broken, &CancellationToken::new()).unwrap();
    assert_eq!(indexed.lemmas, 0);
    assert_eq!(store.count_pages(site.id).unwrap(), 1);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 0);
}

#[test]
fn cancelled_token_writes_nothing() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let builder = IndexBuilder::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default());
    let site = store.site_or_create("https://site.test", "Site").unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = builder.index_page(page(site.id, "/x", "<p>cats</p>"), &token).unwrap_err();
    assert!(matches!(err, IndexingError::Cancelled));
    assert_eq!(store.count_pages(site.id).unwrap(), 0);
}

#[test]
fn concurrent_pages_never_lose_frequency_updates() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let builder = IndexBuilder::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default());
    let site = store.site_or_create("https://site.test", "Site").unwrap();
    let token = CancellationToken::new();

    std::thread::scope(|s| {
        for i in 0..8 {
            let builder = &builder;
            let token = &token;
            s.spawn(move || {
                builder.index_page(page(site.id, &format!("/p{i}"), "<p>cats chase mice</p>"), token).unwrap();
            });
        }
    });
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 8);
    let cat = store.lemma(site.id, "cat").unwrap().unwrap();
    assert_eq!(store.postings_for_lemma(cat.id).unwrap().len(), 8);
}

fn small_site() -> Arc<Fixture> {
    Arc::new(Fixture::with(&[
        ("/", r#"<html><head><title>Home</title></head><body><p>Cats sleep.</p><a href="/pets">pets</a></body></html>"#),
        ("/pets", "<p>Dogs and cats play.</p>"),
    ]))
}

#[tokio::test]
async fn full_crawl_indexes_every_page() {
    let fixture = small_site();
    let (store, service) = service(fixture);

    service.start_indexing().unwrap();
    tokio::time::timeout(Duration::from_secs(10), service.wait_idle()).await.unwrap();

    let stats = service.statistics().unwrap();
    assert_eq!(stats.detailed.len(), 1);
    assert_eq!(stats.detailed[0].status, "INDEXED");
    assert_eq!(stats.detailed[0].pages, 2);
    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 2);
    assert_eq!(frequency(store.as_ref(), site.id, "dog"), 1);
}

#[tokio::test]
async fn second_full_crawl_replaces_previous_data() {
    let (store, service) = service(small_site());
    for _ in 0..2 {
        service.start_indexing().unwrap();
        tokio::time::timeout(Duration::from_secs(10), service.wait_idle()).await.unwrap();
    }
    let sites = store.sites().unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(store.count_pages(sites[0].id).unwrap(), 2);
    assert_eq!(frequency(store.as_ref(), sites[0].id, "cat"), 2);
}

#[tokio::test]
async fn start_is_single_flight_and_stop_cancels() {
    let fixture = Arc::new(Fixture { delay: Some(Duration::from_secs(30)), ..Fixture::with(&[("/", "<p>cats</p>")]) });
    let (store, service) = service(fixture);

    assert!(matches!(service.stop_indexing().await, Err(IndexingError::NotStarted)));
    service.start_indexing().unwrap();
    let again = service.start_indexing().unwrap_err();
    assert_eq!(again.to_string(), "already running");

    service.stop_indexing().await.unwrap();
    assert!(!service.is_running());
    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(site.status, IndexStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some("indexing cancelled by user"));
    assert!(matches!(service.stop_indexing().await, Err(IndexingError::NotStarted)));
}

#[tokio::test]
async fn stop_mid_crawl_leaves_frequencies_consistent() {
    let mut pages = vec![("/".to_string(), String::new())];
    let mut links = String::new();
    for i in 0..40 {
        links.push_str(&format!(r#"<a href="/p{i}">p</a>"#));
        pages.push((format!("/p{i}"), "<p>cats chase mice</p>".to_string()));
    }
    pages[0].1 = format!("<p>cats</p>{links}");
    let fixture = Arc::new(Fixture { pages: Mutex::new(pages.into_iter().collect()), delay: Some(Duration::from_millis(20)) });
    let (store, service) = service(fixture);

    service.start_indexing().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    let _ = service.stop_indexing().await;

    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_ne!(site.status, IndexStatus::Indexing);
    if let Some(cat) = store.lemma(site.id, "cat").unwrap() {
        assert_eq!(cat.frequency as usize, store.postings_for_lemma(cat.id).unwrap().len());
    }
    // the service is usable again after a stop
    service.start_indexing().unwrap();
    tokio::time::timeout(Duration::from_secs(20), service.wait_idle()).await.unwrap();
    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(site.status, IndexStatus::Indexed);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 41);
}

#[tokio::test]
async fn single_page_is_reindexed_in_place() {
    let fixture = small_site();
    let (store, service) = service(fixture.clone());
    service.start_indexing().unwrap();
    tokio::time::timeout(Duration::from_secs(10), service.wait_idle()).await.unwrap();

    fixture.set("/pets", "<p>Birds only.</p>");
    let indexed = service.index_page("https://site.test/pets").await.unwrap();
    assert_eq!(indexed.page.path, "/pets");

    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(site.status, IndexStatus::Indexed);
    assert_eq!(store.count_pages(site.id).unwrap(), 2);
    assert_eq!(frequency(store.as_ref(), site.id, "dog"), 0);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 1);
    assert_eq!(frequency(store.as_ref(), site.id, "bird"), 1);
}

#[tokio::test]
async fn single_page_outside_configured_sites_is_rejected() {
    let (store, service) = service(small_site());
    let err = service.index_page("https://other.test/page").await.unwrap_err();
    assert_eq!(err.to_string(), "url outside configured sites");
    assert!(matches!(service.index_page("not a url").await, Err(IndexingError::InvalidUrl(_))));
    assert!(store.sites().unwrap().is_empty());
}

#[tokio::test]
async fn sites_left_indexing_are_failed_on_startup() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let site = store.site_or_create("https://site.test", "Site").unwrap();
    assert_eq!(site.status, IndexStatus::Indexing);

    let settings = Settings::from_toml(SETTINGS).unwrap();
    let service = IndexingService::new(store.clone() as Arc<dyn Store>, small_site(), settings).unwrap();
    let site = store.site(site.id).unwrap().unwrap();
    assert_eq!(site.status, IndexStatus::Failed);
    service.start_indexing().unwrap();
}

#[tokio::test]
async fn trailing_slash_names_the_same_page() {
    let fixture = Arc::new(Fixture::with(&[("/docs/intro.html", "<p>Cats purr.</p>")]));
    let (store, service) = service(fixture);
    let first = service.index_page("https://site.test/docs/intro.html/").await.unwrap();
    let second = service.index_page("https://site.test/docs/intro.html").await.unwrap();
    assert_eq!(first.page.id, second.page.id);
    assert_eq!(first.page.path, "/docs/intro.html");

    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(store.count_pages(site.id).unwrap(), 1);
    assert_eq!(frequency(store.as_ref(), site.id, "cat"), 1);
}

#[tokio::test]
async fn idle_waiters_wake_when_a_stop_settles() {
    let fixture = Arc::new(Fixture { delay: Some(Duration::from_secs(30)), ..Fixture::with(&[("/", "<p>cats</p>")]) });
    let (store, service) = service(fixture);

    service.start_indexing().unwrap();
    assert!(service.is_running());
    let (stopped, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(service.stop_indexing(), service.wait_idle())
    })
    .await
    .unwrap();
    stopped.unwrap();
    assert!(!service.is_running());
    // the job recreated its site before it saw the cancellation
    let site = store.site_by_url("https://site.test").unwrap().unwrap();
    assert_eq!(site.status, IndexStatus::Failed);
    tokio::time::timeout(Duration::from_millis(50), service.wait_idle()).await.unwrap();
}
