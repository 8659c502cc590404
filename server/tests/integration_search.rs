use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use sitesearch_core::{LemmaExtractor, NewPage, SledStore, Store};
use sitesearch_crawler::{FetchError, PageFetcher, Response};
use sitesearch_indexer::{IndexBuilder, IndexingService, Settings};
use sitesearch_server::search::{SearchEngine, SearchError};
use sitesearch_server::{build_app, AppState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use url::Url;

const SETTINGS: &str = r#"
[[sites]]
url = "https://pets.test"
name = "Pets"

[crawl]
round_delay_ms = 0
"#;

const P1: &str = "<html><head><title>Mixed</title></head><body><p>The cat sat. The dog ran.</p></body></html>";
const P2: &str = "<html><head><title>Kittens</title></head><body><p>A cat and a cat.</p></body></html>";
const P3: &str = "<html><head><title>Puppies</title></head><body><p>Dogs bark.</p></body></html>";

#[derive(Default)]
struct Fixture {
    pages: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl PageFetcher for Fixture {
    async fn fetch(&self, url: &Url) -> Result<Response, FetchError> {
        let body = self.pages.lock().get(url.path()).cloned();
        Ok(match body {
            Some(body) => Response { code: 200, body },
            None => Response { code: 404, body: String::new() },
        })
    }
}

struct TestApp {
    store: Arc<SledStore>,
    state: AppState,
}

impl TestApp {
    fn new(fetcher: Arc<Fixture>) -> Self {
        let store = Arc::new(SledStore::temporary().unwrap());
        let settings = Settings::from_toml(SETTINGS).unwrap();
        let indexing = Arc::new(IndexingService::new(store.clone() as Arc<dyn Store>, fetcher, settings).unwrap());
        let search = Arc::new(SearchEngine::new(store.clone() as Arc<dyn Store>, LemmaExtractor::default()));
        Self { store, state: AppState { indexing, search } }
    }

    /// Indexes P1, P2 and P3 directly, without crawling.
    fn with_pages() -> Self {
        let app = Self::new(Arc::new(Fixture::default()));
        let builder = IndexBuilder::new(app.store.clone() as Arc<dyn Store>, LemmaExtractor::default());
        let site = app.store.site_or_create("https://pets.test", "Pets").unwrap();
        let token = CancellationToken::new();
        for (path, html) in [("/p1", P1), ("/p2", P2), ("/p3", P3)] {
            let page = NewPage { site_id: site.id, path: path.to_string(), code: 200, content: html.to_string() };
            builder.index_page(page, &token).unwrap();
        }
        app
    }

    fn router(&self) -> Router {
        build_app(self.state.clone())
    }
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = call(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = call(app, Request::post(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn paths(json: &Value) -> Vec<&str> {
    json["data"].as_array().unwrap().iter().map(|h| h["path"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn health_is_ok() {
    let app = TestApp::with_pages();
    let (status, body) = call(app.router(), Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn all_query_lemmas_must_be_present() {
    let app = TestApp::with_pages();
    let (status, json) = get_json(app.router(), "/api/search?query=cat%20dog").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], true);
    assert_eq!(json["count"], 1);
    assert_eq!(paths(&json), vec!["/p1"]);
    let hit = &json["data"][0];
    assert_eq!(hit["site"], "https://pets.test");
    assert_eq!(hit["siteName"], "Pets");
    assert_eq!(hit["title"], "Mixed");
    assert_eq!(hit["relevance"].as_f64(), Some(1.0));
}

#[tokio::test]
async fn single_lemma_results_are_ranked() {
    let app = TestApp::with_pages();
    let (_, json) = get_json(app.router(), "/api/search?query=cats").await;
    assert_eq!(json["count"], 2);
    assert_eq!(paths(&json), vec!["/p2", "/p1"]);
    assert_eq!(json["data"][0]["relevance"].as_f64(), Some(1.0));
    assert_eq!(json["data"][1]["relevance"].as_f64(), Some(0.5));
}

#[tokio::test]
async fn snippet_bolds_only_matching_sentence() {
    let app = TestApp::with_pages();
    let outcome = app.state.search.search("cat", None, 0, 20).unwrap();
    let p1 = outcome.results.iter().find(|h| h.path == "/p1").unwrap();
    assert_eq!(p1.snippet, "The <b>cat</b> sat.");
    let p2 = outcome.results.iter().find(|h| h.path == "/p2").unwrap();
    assert_eq!(p2.snippet, "A <b>cat</b> and a <b>cat</b>.");
}

#[tokio::test]
async fn words_only_in_the_title_are_searchable() {
    let app = TestApp::with_pages();
    let builder = IndexBuilder::new(app.store.clone() as Arc<dyn Store>, LemmaExtractor::default());
    let site = app.store.site_by_url("https://pets.test").unwrap().unwrap();
    let html = "<html><head><title>Zebra facts</title></head><body><p>Stripes everywhere.</p></body></html>";
    let page = NewPage { site_id: site.id, path: "/zebra".to_string(), code: 200, content: html.to_string() };
    builder.index_page(page, &CancellationToken::new()).unwrap();

    let (_, json) = get_json(app.router(), "/api/search?query=zebra").await;
    assert_eq!(json["count"], 1);
    assert_eq!(paths(&json), vec!["/zebra"]);
    assert_eq!(json["data"][0]["title"], "Zebra facts");
}

#[tokio::test]
async fn pagination_keeps_total_count() {
    let app = TestApp::with_pages();
    let (_, json) = get_json(app.router(), "/api/search?query=cat&offset=1&limit=1").await;
    assert_eq!(json["count"], 2);
    assert_eq!(paths(&json), vec!["/p1"]);

    let (_, json) = get_json(app.router(), "/api/search?query=cat&offset=5").await;
    assert_eq!(json["count"], 2);
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_words_are_ignored_and_function_words_match_nothing() {
    let app = TestApp::with_pages();
    let (_, json) = get_json(app.router(), "/api/search?query=dog%20zebra").await;
    assert_eq!(json["count"], 2);
    let (_, json) = get_json(app.router(), "/api/search?query=the").await;
    assert_eq!(json["result"], true);
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn empty_query_is_an_error() {
    let app = TestApp::with_pages();
    let (status, json) = get_json(app.router(), "/api/search?query=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], false);
    assert_eq!(json["error"], "empty query");
    assert!(matches!(app.state.search.search("   ", None, 0, 20), Err(SearchError::EmptyQuery)));
}

#[tokio::test]
async fn site_filter_must_name_a_stored_site() {
    let app = TestApp::with_pages();
    let (_, json) = get_json(app.router(), "/api/search?query=cat&site=https://pets.test/").await;
    assert_eq!(json["count"], 2);
    let (_, json) = get_json(app.router(), "/api/search?query=cat&site=https://other.test").await;
    assert_eq!(json["result"], false);
    assert!(json["error"].as_str().unwrap().starts_with("unknown site"));
}

#[tokio::test]
async fn index_page_validates_url() {
    let app = TestApp::with_pages();
    let (status, json) = post_json(app.router(), "/api/indexPage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "malformed url");

    let (status, json) = post_json(app.router(), "/api/indexPage?url=no%20scheme").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["result"], false);

    let (status, json) = post_json(app.router(), "/api/indexPage?url=https://other.test/page").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["error"], "url outside configured sites");
}

#[tokio::test]
async fn stop_without_running_crawl_is_rejected() {
    let app = TestApp::with_pages();
    let (_, json) = get_json(app.router(), "/api/stopIndexing").await;
    assert_eq!(json["result"], false);
    assert_eq!(json["error"], "not started");
}

#[tokio::test]
async fn crawl_then_search_end_to_end() {
    let fixture = Arc::new(Fixture::default());
    fixture.pages.lock().extend([
        ("/".to_string(), r#"<title>Home</title><a href="/p1">1</a><a href="/p2">2</a>"#.to_string()),
        ("/p1".to_string(), P1.to_string()),
        ("/p2".to_string(), P2.to_string()),
    ]);
    let app = TestApp::new(fixture.clone());

    let (_, json) = get_json(app.router(), "/api/startIndexing").await;
    assert_eq!(json["result"], true);
    tokio::time::timeout(Duration::from_secs(10), app.state.indexing.wait_idle()).await.unwrap();

    let (_, json) = get_json(app.router(), "/api/statistics").await;
    assert_eq!(json["statistics"]["total"]["pages"], 3);
    assert_eq!(json["statistics"]["detailed"][0]["status"], "INDEXED");

    let (_, json) = get_json(app.router(), "/api/search?query=dog").await;
    assert_eq!(paths(&json), vec!["/p1"]);

    fixture.pages.lock().insert("/p2".to_string(), P3.to_string());
    let (_, json) = post_json(app.router(), "/api/indexPage?url=https://pets.test/p2").await;
    assert_eq!(json["result"], true);
    let (_, json) = get_json(app.router(), "/api/search?query=dog").await;
    assert_eq!(json["count"], 2);
}
