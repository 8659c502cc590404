use crate::config::ConfigError;
use sitesearch_core::StoreError;
use sitesearch_crawler::{FetchError, WalkError};
use thiserror::Error;

/// Failures of the indexing layer. The `Display` text of the first four
/// variants is what callers of the start/stop/add-page operations see.
#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("already running")]
    AlreadyRunning,
    #[error("not started")]
    NotStarted,
    #[error("stopping in progress")]
    Stopping,
    #[error("url outside configured sites")]
    OutsideConfiguredSites,
    #[error("malformed url: {0}")]
    InvalidUrl(String),
    #[error("indexing cancelled by user")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("walk failed: {0}")]
    Walk(WalkError),
    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<WalkError> for IndexingError {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::Cancelled => IndexingError::Cancelled,
            other => IndexingError::Walk(other),
        }
    }
}

impl From<tokio::task::JoinError> for IndexingError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexingError::Worker(err.to_string())
    }
}
