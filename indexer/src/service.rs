use crate::builder::{IndexBuilder, IndexedPage};
use crate::config::{Settings, SiteConfig};
use crate::error::IndexingError;
use parking_lot::Mutex;
use serde::Serialize;
use sitesearch_core::{IndexStatus, LemmaExtractor, NewPage, Site, SiteId, Store};
use sitesearch_crawler::links::page_path;
use sitesearch_crawler::{FetchedPage, PageFetcher, WalkReport, Walker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;

const RESTART_INTERRUPTED: &str = "indexing interrupted by restart";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStats {
    pub url: String,
    pub name: String,
    pub status: String,
    pub status_time: String,
    pub error: Option<String>,
    pub pages: usize,
    pub lemmas: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalStats {
    pub sites: usize,
    pub pages: usize,
    pub lemmas: usize,
    pub indexing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total: TotalStats,
    pub detailed: Vec<SiteStats>,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub walk: WalkReport,
    pub indexed: usize,
}

struct Control {
    token: CancellationToken,
    jobs: Vec<JoinHandle<()>>,
    stopping: bool,
}

/// Live crawl jobs; `changed` fires whenever a job ends or a stop settles.
#[derive(Default)]
struct Activity {
    jobs: AtomicUsize,
    changed: Notify,
}

impl Activity {
    fn enter(self: &Arc<Self>) -> JobGuard {
        self.jobs.fetch_add(1, Ordering::SeqCst);
        JobGuard(self.clone())
    }
}

/// Held by a running job; counts it out even if the task is aborted.
struct JobGuard(Arc<Activity>);

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.0.jobs.fetch_sub(1, Ordering::SeqCst);
        self.0.changed.notify_waiters();
    }
}

/// Clears the stop flag even when the waiting caller goes away.
struct StopGuard<'a>(&'a Mutex<Control>, &'a Activity);

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().stopping = false;
        self.1.changed.notify_waiters();
    }
}

/// Everything a per-site job needs, cloned into the spawned task.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn PageFetcher>,
    settings: Arc<Settings>,
    builder: Arc<IndexBuilder>,
    site_slots: Arc<Semaphore>,
    index_slots: Arc<Semaphore>,
    activity: Arc<Activity>,
}

/// Starts, stops and tracks crawl jobs. At most one full indexing run is in
/// flight; each configured site gets its own job, and jobs beyond
/// `max_parallel_sites` wait for a slot.
pub struct IndexingService {
    worker: Worker,
    control: Mutex<Control>,
}

impl IndexingService {
    /// Sites left `INDEXING` by a previous process are marked `FAILED`.
    pub fn new(store: Arc<dyn Store>, fetcher: Arc<dyn PageFetcher>, settings: Settings) -> Result<Self, IndexingError> {
        for site in store.sites()? {
            if site.status == IndexStatus::Indexing {
                tracing::warn!(site = %site.url, "site was left indexing, marking failed");
                store.update_site_status(site.id, IndexStatus::Failed, Some(RESTART_INTERRUPTED.to_string()))?;
            }
        }
        let worker = Worker {
            builder: Arc::new(IndexBuilder::new(store.clone(), LemmaExtractor::default())),
            site_slots: Arc::new(Semaphore::new(settings.crawl.max_parallel_sites.max(1))),
            index_slots: Arc::new(Semaphore::new(settings.crawl.index_concurrency.max(1))),
            activity: Arc::default(),
            settings: Arc::new(settings),
            store,
            fetcher,
        };
        Ok(Self {
            worker,
            control: Mutex::new(Control { token: CancellationToken::new(), jobs: Vec::new(), stopping: false }),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.worker.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.worker.store
    }

    pub fn is_running(&self) -> bool {
        self.worker.activity.jobs.load(Ordering::SeqCst) > 0
    }

    /// Resolves once no crawl job is left, whether finished or stopped.
    pub async fn wait_idle(&self) {
        loop {
            let mut changed = std::pin::pin!(self.worker.activity.changed.notified());
            changed.as_mut().enable();
            if !self.is_running() && !self.control.lock().stopping {
                return;
            }
            changed.await;
        }
    }

    /// Spawns one crawl job per configured site. Each job first wipes its
    /// site's previous data on the blocking pool, then crawls it.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn start_indexing(&self) -> Result<(), IndexingError> {
        let mut control = self.control.lock();
        control.jobs.retain(|job| !job.is_finished());
        if control.stopping || !control.jobs.is_empty() || self.worker.store.any_site_indexing()? {
            return Err(IndexingError::AlreadyRunning);
        }

        tracing::info!(sites = self.worker.settings.sites.len(), "indexing started");
        for config in &self.worker.settings.sites {
            let worker = self.worker.clone();
            let config = config.clone();
            let token = control.token.child_token();
            let active = self.worker.activity.enter();
            control.jobs.push(tokio::spawn(async move {
                let _active = active;
                worker.run_site(config, token).await
            }));
        }
        Ok(())
    }

    /// Cancels the running jobs and waits until every one of them has unwound.
    pub async fn stop_indexing(&self) -> Result<(), IndexingError> {
        let jobs = {
            let mut control = self.control.lock();
            if control.stopping {
                return Err(IndexingError::Stopping);
            }
            control.jobs.retain(|job| !job.is_finished());
            if control.jobs.is_empty() {
                return Err(IndexingError::NotStarted);
            }
            control.stopping = true;
            control.token.cancel();
            control.token = CancellationToken::new();
            std::mem::take(&mut control.jobs)
        };
        let _guard = StopGuard(&self.control, &self.worker.activity);
        tracing::info!(jobs = jobs.len(), "stopping indexing");
        for job in jobs {
            if let Err(e) = job.await {
                tracing::error!(error = %e, "indexing job panicked");
            }
        }
        Ok(())
    }

    /// Fetches a single page again and replaces its index entries.
    pub async fn index_page(&self, raw_url: &str) -> Result<IndexedPage, IndexingError> {
        let url = Url::parse(raw_url.trim()).map_err(|e| IndexingError::InvalidUrl(format!("{raw_url}: {e}")))?;
        let config = self.worker.settings.site_for(&url).cloned().ok_or(IndexingError::OutsideConfiguredSites)?;
        let path = page_path(&url).ok_or_else(|| IndexingError::InvalidUrl(raw_url.to_string()))?;

        let during_crawl = self.is_running();
        let token = self.control.lock().token.child_token();
        let store = self.worker.store.clone();
        let site = tokio::task::spawn_blocking(move || -> Result<Site, IndexingError> {
            let site = store.site_or_create(&config.url, &config.name)?;
            if !during_crawl {
                store.update_site_status(site.id, IndexStatus::Indexing, None)?;
            }
            Ok(site)
        })
        .await??;

        let result = self.worker.refresh_page(&site, path, &token).await;
        if !during_crawl {
            let (status, error) = match &result {
                Ok(_) => (IndexStatus::Indexed, None),
                Err(e) => (IndexStatus::Failed, Some(e.to_string())),
            };
            self.worker.set_status(site.id, status, error).await?;
        }
        result
    }

    /// Page, lemma and status figures per stored site. Blocking.
    pub fn statistics(&self) -> Result<Statistics, IndexingError> {
        let store = &self.worker.store;
        let mut detailed = Vec::new();
        for site in store.sites()? {
            detailed.push(SiteStats {
                pages: store.count_pages(site.id)?,
                lemmas: store.count_lemmas(site.id)?,
                status: site.status.to_string(),
                url: site.url,
                name: site.name,
                status_time: site.status_time,
                error: site.last_error,
            });
        }
        let total = TotalStats {
            sites: detailed.len(),
            pages: detailed.iter().map(|s| s.pages).sum(),
            lemmas: detailed.iter().map(|s| s.lemmas).sum(),
            indexing: self.is_running(),
        };
        Ok(Statistics { total, detailed })
    }
}

impl Worker {
    async fn run_site(self, config: SiteConfig, token: CancellationToken) {
        let site = match self.reset_site(config).await {
            Ok(site) => site,
            Err(e) => {
                tracing::error!(error = %e, "cannot reset site before indexing");
                return;
            }
        };
        let result = self.crawl_site(&site, &token).await;
        let (status, error) = match &result {
            Ok(summary) => {
                tracing::info!(site = %site.url, pages = summary.walk.pages, indexed = summary.indexed, "site indexed");
                (IndexStatus::Indexed, None)
            }
            Err(IndexingError::Cancelled) => {
                tracing::info!(site = %site.url, "site indexing cancelled");
                (IndexStatus::Failed, Some(IndexingError::Cancelled.to_string()))
            }
            Err(e) => {
                tracing::error!(site = %site.url, error = %e, "site indexing failed");
                (IndexStatus::Failed, Some(e.to_string()))
            }
        };
        if let Err(e) = self.set_status(site.id, status, error).await {
            tracing::error!(site = %site.url, error = %e, "cannot record site status");
        }
    }

    /// Drops the site's previous pages and lemmas and recreates it as `INDEXING`.
    async fn reset_site(&self, config: SiteConfig) -> Result<Site, IndexingError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<Site, IndexingError> {
            if let Some(old) = store.site_by_url(&config.url)? {
                store.delete_site(old.id)?;
            }
            Ok(store.site_or_create(&config.url, &config.name)?)
        })
        .await?
    }

    async fn crawl_site(&self, site: &Site, token: &CancellationToken) -> Result<CrawlSummary, IndexingError> {
        let _slot = tokio::select! {
            _ = token.cancelled() => return Err(IndexingError::Cancelled),
            permit = self.site_slots.acquire() => permit.map_err(|e| IndexingError::Worker(e.to_string()))?,
        };
        let seed = Url::parse(&site.url).map_err(|e| IndexingError::InvalidUrl(format!("{}: {e}", site.url)))?;
        let job = token.child_token();
        let (tx, rx) = mpsc::channel(self.settings.crawl.fetch_concurrency.max(1) * 2);
        let mut walker = Walker::new(self.fetcher.clone(), self.settings.walk_config(), seed);

        let (walked, indexed) = tokio::join!(walker.walk(&job, tx), self.consume(site.id, rx, &job));
        match (walked, indexed) {
            (_, Err(e)) if !matches!(e, IndexingError::Cancelled) => Err(e),
            (Err(e), _) => Err(e.into()),
            (Ok(_), Err(e)) => Err(e),
            (Ok(walk), Ok(indexed)) => Ok(CrawlSummary { walk, indexed }),
        }
    }

    /// Indexes pages as the walk streams them in. On the first failure the
    /// job token is cancelled, which also stops the walk; pages already
    /// being written are awaited before returning.
    async fn consume(
        &self,
        site: SiteId,
        mut pages: mpsc::Receiver<FetchedPage>,
        token: &CancellationToken,
    ) -> Result<usize, IndexingError> {
        let mut workers: JoinSet<Result<IndexedPage, IndexingError>> = JoinSet::new();
        let mut indexed = 0usize;
        let mut open = true;
        let mut outcome = Ok(());

        loop {
            if !open && workers.is_empty() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    outcome = Err(IndexingError::Cancelled);
                    break;
                }
                page = pages.recv(), if open => {
                    let Some(page) = page else {
                        open = false;
                        continue;
                    };
                    let permit = tokio::select! {
                        _ = token.cancelled() => {
                            outcome = Err(IndexingError::Cancelled);
                            break;
                        }
                        permit = self.index_slots.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(e) => {
                                outcome = Err(IndexingError::Worker(e.to_string()));
                                break;
                            }
                        },
                    };
                    let builder = self.builder.clone();
                    let job = token.clone();
                    let new_page = NewPage { site_id: site, path: page.path, code: page.code, content: page.content };
                    workers.spawn_blocking(move || {
                        let _permit = permit;
                        builder.index_page(new_page, &job)
                    });
                }
                Some(done) = workers.join_next(), if !workers.is_empty() => {
                    match done.map_err(IndexingError::from).and_then(|r| r) {
                        Ok(_) => indexed += 1,
                        Err(e) => {
                            outcome = Err(e);
                            break;
                        }
                    }
                }
            }
        }

        if outcome.is_err() {
            token.cancel();
        }
        while let Some(done) = workers.join_next().await {
            if let Ok(Ok(_)) = done {
                indexed += 1;
            }
        }
        outcome.map(|_| indexed)
    }

    async fn refresh_page(&self, site: &Site, path: String, token: &CancellationToken) -> Result<IndexedPage, IndexingError> {
        let base = Url::parse(&site.url).map_err(|e| IndexingError::InvalidUrl(format!("{}: {e}", site.url)))?;
        let walker = Walker::new(self.fetcher.clone(), self.settings.walk_config(), base.clone());
        let fetched = walker.fetch_one(&base, path, token).await?;
        if !fetched.is_success() {
            tracing::warn!(url = %fetched.url, code = fetched.code, "page did not load, dropping it from the index");
        }
        let builder = self.builder.clone();
        let job = token.clone();
        let page = NewPage { site_id: site.id, path: fetched.path, code: fetched.code, content: fetched.content };
        tokio::task::spawn_blocking(move || builder.index_page(page, &job)).await?
    }

    async fn set_status(&self, site: SiteId, status: IndexStatus, error: Option<String>) -> Result<(), IndexingError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.update_site_status(site, status, error)).await??;
        Ok(())
    }
}
