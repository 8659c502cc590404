pub mod builder;
pub mod config;
pub mod error;
pub mod service;

pub use builder::{IndexBuilder, IndexedPage};
pub use config::{ConfigError, CrawlSettings, Settings, SiteConfig};
pub use error::IndexingError;
pub use service::{CrawlSummary, IndexingService, SiteStats, Statistics, TotalStats};
