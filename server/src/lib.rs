pub mod search;
pub mod snippet;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use search::{SearchEngine, SearchError, SearchHit};
use serde::{Deserialize, Serialize};
use sitesearch_indexer::{IndexingError, IndexingService, Statistics};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub indexing: Arc<IndexingService>,
    pub search: Arc<SearchEngine>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Self {
        Self { result: true, error: None }
    }

    fn failed(error: impl ToString) -> Self {
        Self { result: false, error: Some(error.to_string()) }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub result: bool,
    pub count: usize,
    pub data: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub result: bool,
    pub statistics: Statistics,
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    pub site: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Deserialize)]
pub struct IndexPageParams {
    pub url: Option<String>,
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/startIndexing", get(start_handler))
        .route("/api/stopIndexing", get(stop_handler))
        .route("/api/indexPage", post(index_page_handler))
        .route("/api/search", get(search_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn internal(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiResponse::failed("internal error"))).into_response()
}

pub async fn statistics_handler(State(state): State<AppState>) -> Response {
    let indexing = state.indexing.clone();
    match tokio::task::spawn_blocking(move || indexing.statistics()).await {
        Ok(Ok(statistics)) => Json(StatisticsResponse { result: true, statistics }).into_response(),
        Ok(Err(e)) => internal(e),
        Err(e) => internal(e),
    }
}

pub async fn start_handler(State(state): State<AppState>) -> Response {
    match state.indexing.start_indexing() {
        Ok(()) => Json(ApiResponse::ok()).into_response(),
        Err(e @ IndexingError::AlreadyRunning) => Json(ApiResponse::failed(e)).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn stop_handler(State(state): State<AppState>) -> Response {
    match state.indexing.stop_indexing().await {
        Ok(()) => Json(ApiResponse::ok()).into_response(),
        Err(e @ (IndexingError::NotStarted | IndexingError::Stopping)) => Json(ApiResponse::failed(e)).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn index_page_handler(State(state): State<AppState>, Query(params): Query<IndexPageParams>) -> Response {
    let Some(url) = params.url.filter(|u| !u.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::failed("malformed url"))).into_response();
    };
    match state.indexing.index_page(&url).await {
        Ok(indexed) => {
            tracing::info!(url = %url, lemmas = indexed.lemmas, "page reindexed");
            Json(ApiResponse::ok()).into_response()
        }
        Err(IndexingError::InvalidUrl(reason)) => {
            tracing::debug!(%reason, "rejected page url");
            (StatusCode::BAD_REQUEST, Json(ApiResponse::failed("malformed url"))).into_response()
        }
        Err(e) => Json(ApiResponse::failed(e)).into_response(),
    }
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let started = std::time::Instant::now();
    let engine = state.search.clone();
    let SearchParams { query, site, offset, limit } = params;
    let outcome = tokio::task::spawn_blocking(move || engine.search(&query, site.as_deref(), offset, limit)).await;
    match outcome {
        Ok(Ok(outcome)) => {
            tracing::debug!(count = outcome.count, took_ms = started.elapsed().as_millis() as u64, "search served");
            Json(SearchResponse { result: true, count: outcome.count, data: outcome.results, error: None }).into_response()
        }
        Ok(Err(e @ (SearchError::EmptyQuery | SearchError::UnknownSite(_)))) => {
            Json(SearchResponse { result: false, count: 0, data: Vec::new(), error: Some(e.to_string()) }).into_response()
        }
        Ok(Err(e)) => internal(e),
        Err(e) => internal(e),
    }
}
