use serde::Deserialize;
use sitesearch_crawler::links::site_root;
use sitesearch_crawler::{FetchSettings, WalkConfig};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "sitesearch-bot/0.1 (+https://example.com/bot)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("site {url:?}: {reason}")]
    InvalidSite { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Parallel fetches inside one walk round.
    pub fetch_concurrency: usize,
    /// Pages indexed at once, shared by all running sites.
    pub index_concurrency: usize,
    /// Sites crawled at once; further sites wait for a slot.
    pub max_parallel_sites: usize,
    pub round_delay_ms: u64,
    pub timeout_secs: u64,
    pub respect_robots: bool,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: 8,
            index_concurrency: 4,
            max_parallel_sites: 4,
            round_delay_ms: 200,
            timeout_secs: 12,
            respect_robots: true,
        }
    }
}

/// Settings file, e.g.
///
/// ```toml
/// user_agent = "sitesearch-bot/0.1"
/// referrer = "https://www.google.com"
///
/// [[sites]]
/// url = "https://example.com"
/// name = "Example"
///
/// [crawl]
/// fetch_concurrency = 8
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub sites: Vec<SiteConfig>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub crawl: CrawlSettings,
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_toml(&raw)
    }

    /// Parses settings and rewrites every site url to its `scheme://host[:port]` form.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = toml::from_str(raw)?;
        for site in &mut settings.sites {
            let parsed = Url::parse(&site.url)
                .map_err(|e| ConfigError::InvalidSite { url: site.url.clone(), reason: e.to_string() })?;
            site.url = site_root(&parsed).ok_or_else(|| ConfigError::InvalidSite {
                url: site.url.clone(),
                reason: "expected an http(s) address with a host".into(),
            })?;
        }
        Ok(settings)
    }

    /// Configured site whose scheme and host match `url`.
    pub fn site_for(&self, url: &Url) -> Option<&SiteConfig> {
        let root = site_root(url)?;
        self.sites.iter().find(|s| s.url == root)
    }

    pub fn walk_config(&self) -> WalkConfig {
        WalkConfig {
            fetch_concurrency: self.crawl.fetch_concurrency,
            round_delay: Duration::from_millis(self.crawl.round_delay_ms),
            respect_robots: self.crawl.respect_robots,
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            referrer: self.referrer.clone(),
            timeout: Duration::from_secs(self.crawl.timeout_secs),
        }
    }
}
