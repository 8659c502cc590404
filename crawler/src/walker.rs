use crate::fetch::PageFetcher;
use crate::links::{extract_links, page_path};
use crate::robots::RobotsRules;
use futures::{stream, StreamExt, TryStreamExt};
use sitesearch_core::UNREACHABLE_STATUS;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub path: String,
    pub code: u16,
    pub content: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("walk cancelled")]
    Cancelled,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("page consumer went away")]
    ConsumerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    Seeded,
    Walking,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub fetch_concurrency: usize,
    /// Pause between frontier rounds; robots.txt `Crawl-delay` can only raise it.
    pub round_delay: Duration,
    pub respect_robots: bool,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self { fetch_concurrency: 8, round_delay: Duration::from_millis(200), respect_robots: true }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkReport {
    pub rounds: usize,
    pub pages: usize,
    pub failed: usize,
    pub disallowed: usize,
}

/// Frontier-expansion crawl of one site.
///
/// Each round fetches the whole frontier in parallel, hands the pages to the
/// consumer, and builds the next frontier from links not yet visited. The
/// visited set is owned by the walk itself, so a path is fetched at most once
/// even when several pages of the same round link to it.
pub struct Walker {
    fetcher: Arc<dyn PageFetcher>,
    config: WalkConfig,
    seed: Url,
    state: WalkState,
}

impl Walker {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: WalkConfig, seed: Url) -> Self {
        Self { fetcher, config, seed, state: WalkState::Seeded }
    }

    pub fn state(&self) -> WalkState {
        self.state
    }

    pub async fn walk(
        &mut self,
        token: &CancellationToken,
        pages: mpsc::Sender<FetchedPage>,
    ) -> Result<WalkReport, WalkError> {
        self.state = WalkState::Walking;
        let result = self.expand(token, pages).await;
        self.state = match &result {
            Ok(_) => WalkState::Done,
            Err(WalkError::Cancelled) => WalkState::Cancelled,
            Err(_) => WalkState::Failed,
        };
        result
    }

    async fn expand(&self, token: &CancellationToken, pages: mpsc::Sender<FetchedPage>) -> Result<WalkReport, WalkError> {
        let base = self.seed.join("/").map_err(|e| WalkError::InvalidUrl(format!("{}: {e}", self.seed)))?;
        let start = page_path(&self.seed).unwrap_or_else(|| "/".to_string());
        let robots = if self.config.respect_robots {
            self.robots(&base, token).await?
        } else {
            RobotsRules::default()
        };
        let delay = robots.crawl_delay.map_or(self.config.round_delay, |d| d.max(self.config.round_delay));

        let mut report = WalkReport::default();
        let mut visited: HashSet<String> = HashSet::from([start.clone()]);
        let mut frontier = vec![start];

        while !frontier.is_empty() {
            if token.is_cancelled() {
                return Err(WalkError::Cancelled);
            }
            report.rounds += 1;
            tracing::debug!(site = %base, round = report.rounds, frontier = frontier.len(), "walk round");
            let fetched: Vec<FetchedPage> = stream::iter(frontier.into_iter().map(|path| self.fetch_one(&base, path, token)))
                .buffered(self.config.fetch_concurrency.max(1))
                .try_collect()
                .await?;

            let mut next = Vec::new();
            for page in fetched {
                report.pages += 1;
                if page.is_success() {
                    for path in extract_links(&base, &page.path, &page.content) {
                        if !visited.insert(path.clone()) {
                            continue;
                        }
                        if robots.allows(&path) {
                            next.push(path);
                        } else {
                            report.disallowed += 1;
                        }
                    }
                } else {
                    report.failed += 1;
                }
                pages.send(page).await.map_err(|_| WalkError::ConsumerClosed)?;
            }
            frontier = next;

            if !frontier.is_empty() {
                tokio::select! {
                    _ = token.cancelled() => return Err(WalkError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        tracing::info!(site = %base, rounds = report.rounds, pages = report.pages, failed = report.failed, "walk finished");
        Ok(report)
    }

    /// Fetches one page of the site. Transport failures become a page with
    /// [`UNREACHABLE_STATUS`]; only cancellation is an error.
    pub async fn fetch_one(&self, base: &Url, path: String, token: &CancellationToken) -> Result<FetchedPage, WalkError> {
        if token.is_cancelled() {
            return Err(WalkError::Cancelled);
        }
        let url = base.join(&path).map_err(|e| WalkError::InvalidUrl(format!("{base}{path}: {e}")))?;
        let response = tokio::select! {
            _ = token.cancelled() => return Err(WalkError::Cancelled),
            r = self.fetcher.fetch(&url) => r,
        };
        Ok(match response {
            Ok(r) => FetchedPage { url, path, code: r.code, content: r.body },
            Err(e) => {
                tracing::warn!(error = %e, "page unreachable");
                FetchedPage { url, path, code: UNREACHABLE_STATUS, content: String::new() }
            }
        })
    }

    async fn robots(&self, base: &Url, token: &CancellationToken) -> Result<RobotsRules, WalkError> {
        let url = base.join("/robots.txt").map_err(|e| WalkError::InvalidUrl(e.to_string()))?;
        let response = tokio::select! {
            _ = token.cancelled() => return Err(WalkError::Cancelled),
            r = self.fetcher.fetch(&url) => r,
        };
        Ok(match response {
            Ok(r) if (200..300).contains(&r.code) => RobotsRules::parse(&r.body),
            _ => RobotsRules::default(),
        })
    }
}
