use crate::error::IndexingError;
use parking_lot::Mutex;
use sitesearch_core::{LemmaExtractor, LemmaId, NewPage, Page, SiteId, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct IndexedPage {
    pub page: Page,
    pub lemmas: usize,
}

/// Turns fetched pages into postings.
///
/// Lemma extraction runs without any lock. Everything that touches lemma
/// frequencies for a site (removing the previous version of a page, bumping
/// frequencies, writing postings) runs under that site's lock, and a page's
/// postings are written after its frequencies in a single store transaction,
/// so a page is never queryable with only part of its lemmas.
pub struct IndexBuilder {
    store: Arc<dyn Store>,
    extractor: LemmaExtractor,
    site_locks: Mutex<HashMap<SiteId, Arc<Mutex<()>>>>,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn Store>, extractor: LemmaExtractor) -> Self {
        Self { store, extractor, site_locks: Mutex::new(HashMap::new()) }
    }

    pub fn extractor(&self) -> &LemmaExtractor {
        &self.extractor
    }

    fn site_lock(&self, site: SiteId) -> Arc<Mutex<()>> {
        self.site_locks.lock().entry(site).or_default().clone()
    }

    /// Stores the page and its postings, replacing any page already stored
    /// at the same path. Pages without a 2xx status are stored unindexed.
    ///
    /// Blocking; call from a blocking worker.
    pub fn index_page(&self, page: NewPage, token: &CancellationToken) -> Result<IndexedPage, IndexingError> {
        if token.is_cancelled() {
            return Err(IndexingError::Cancelled);
        }
        let counts = if (200..300).contains(&page.code) {
            self.extractor.extract_lemmas(&page.content)
        } else {
            Default::default()
        };

        let lock = self.site_lock(page.site_id);
        let _guard = lock.lock();
        // last exit point; past here the page is written completely
        if token.is_cancelled() {
            return Err(IndexingError::Cancelled);
        }
        if let Some(old) = self.store.page_by_path(page.site_id, &page.path)? {
            self.store.delete_page(old.id)?;
            tracing::debug!(site_id = page.site_id, path = %old.path, "replacing indexed page");
        }
        let stored = self.store.save_page(page)?;
        if counts.is_empty() {
            return Ok(IndexedPage { page: stored, lemmas: 0 });
        }

        let texts: Vec<String> = counts.keys().cloned().collect();
        let lemmas = self.store.lemmas_or_create(stored.site_id, &texts)?;
        let ids: Vec<LemmaId> = lemmas.iter().map(|l| l.id).collect();
        let postings: Vec<(LemmaId, f32)> = lemmas
            .iter()
            .map(|l| (l.id, counts.get(&l.lemma).copied().unwrap_or(0) as f32))
            .collect();

        self.store.adjust_frequencies(&ids, 1)?;
        if let Err(e) = self.store.save_postings(stored.id, &postings) {
            self.store.adjust_frequencies(&ids, -1)?;
            return Err(e.into());
        }
        tracing::trace!(page_id = stored.id, path = %stored.path, lemmas = ids.len(), "page indexed");
        Ok(IndexedPage { page: stored, lemmas: ids.len() })
    }

    /// Removes a page and reverses its lemma frequencies. Returns false when no page is stored at `path`.
    pub fn remove_page(&self, site: SiteId, path: &str) -> Result<bool, IndexingError> {
        let lock = self.site_lock(site);
        let _guard = lock.lock();
        match self.store.page_by_path(site, path)? {
            Some(page) => {
                self.store.delete_page(page.id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
