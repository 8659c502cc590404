use crate::snippet;
use serde::Serialize;
use sitesearch_core::{html, LemmaExtractor, LemmaId, Page, PageId, Site, SiteId, Store, StoreError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty query")]
    EmptyQuery,
    #[error("unknown site {0}")]
    UnknownSite(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Matching pages before pagination.
    pub count: usize,
    pub results: Vec<SearchHit>,
}

/// A query lemma with its per-site rows and total frequency over the searched sites.
struct QueryLemma {
    text: String,
    ids: BTreeMap<SiteId, LemmaId>,
    frequency: u64,
}

pub struct SearchEngine {
    store: Arc<dyn Store>,
    extractor: LemmaExtractor,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn Store>, extractor: LemmaExtractor) -> Self {
        Self { store, extractor }
    }

    /// Ranked pages containing every query lemma that occurs on the searched sites.
    ///
    /// Query lemmas that appear nowhere are ignored rather than emptying the
    /// result. Relevance is the page's rank sum over the query lemmas,
    /// divided by the best such sum among the matches.
    pub fn search(&self, query: &str, site: Option<&str>, offset: usize, limit: usize) -> Result<SearchOutcome, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let sites = self.sites(site)?;
        let lemmas = self.query_lemmas(query, &sites)?;
        let Some((rarest, rest)) = lemmas.split_first() else {
            return Ok(SearchOutcome::default());
        };
        tracing::debug!(query, lemmas = ?lemmas.iter().map(|l| l.text.as_str()).collect::<Vec<_>>(), "search lemmas");

        let mut candidates: Vec<PageId> = Vec::new();
        for id in rarest.ids.values() {
            candidates.extend(self.store.postings_for_lemma(*id)?.into_iter().map(|p| p.page_id));
        }
        let mut pages: Vec<Page> = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(page) = self.store.page(id)? {
                pages.push(page);
            }
        }
        for lemma in rest {
            pages = self.narrow(pages, lemma)?;
            if pages.is_empty() {
                break;
            }
        }

        let mut ranked = Vec::with_capacity(pages.len());
        for page in pages {
            let ids: Vec<LemmaId> = lemmas.iter().filter_map(|l| l.ids.get(&page.site_id).copied()).collect();
            let rank = self.store.rank_sum(page.id, &ids)?;
            ranked.push((page, rank));
        }
        let max = ranked.iter().map(|(_, r)| *r).fold(0.0f64, f64::max);
        let mut ranked: Vec<(Page, f64)> =
            ranked.into_iter().map(|(p, r)| (p, if max > 0.0 { r / max } else { 0.0 })).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let count = ranked.len();
        let texts: HashSet<String> = lemmas.iter().map(|l| l.text.clone()).collect();
        let sites: HashMap<SiteId, &Site> = sites.iter().map(|s| (s.id, s)).collect();
        let results = ranked
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(page, relevance)| {
                let site = sites.get(&page.site_id)?;
                Some(SearchHit {
                    site: site.url.clone(),
                    site_name: site.name.clone(),
                    title: html::title(&page.content),
                    snippet: snippet::snippet(&page.content, &texts, self.extractor.analyzer()),
                    path: page.path,
                    relevance,
                })
            })
            .collect();
        Ok(SearchOutcome { count, results })
    }

    fn sites(&self, filter: Option<&str>) -> Result<Vec<Site>, SearchError> {
        match filter.map(|s| s.trim().trim_end_matches('/')).filter(|s| !s.is_empty()) {
            Some(url) => match self.store.site_by_url(url)? {
                Some(site) => Ok(vec![site]),
                None => Err(SearchError::UnknownSite(url.to_string())),
            },
            None => Ok(self.store.sites()?),
        }
    }

    /// Distinct query lemmas present on the searched sites, rarest first.
    fn query_lemmas(&self, query: &str, sites: &[Site]) -> Result<Vec<QueryLemma>, SearchError> {
        let mut lemmas = Vec::new();
        for text in self.extractor.extract_text_lemmas(query).into_keys() {
            let mut ids = BTreeMap::new();
            let mut frequency = 0u64;
            for site in sites {
                if let Some(row) = self.store.lemma(site.id, &text)? {
                    if row.frequency > 0 {
                        frequency += u64::from(row.frequency);
                        ids.insert(site.id, row.id);
                    }
                }
            }
            if frequency > 0 {
                lemmas.push(QueryLemma { text, ids, frequency });
            }
        }
        lemmas.sort_by_key(|l| l.frequency);
        Ok(lemmas)
    }

    /// Keeps the pages that carry a posting for `lemma`.
    fn narrow(&self, pages: Vec<Page>, lemma: &QueryLemma) -> Result<Vec<Page>, SearchError> {
        let mut kept = Vec::with_capacity(pages.len());
        for page in pages {
            let Some(id) = lemma.ids.get(&page.site_id) else {
                continue;
            };
            if self.store.posting(page.id, *id)?.is_some() {
                kept.push(page);
            }
        }
        Ok(kept)
    }
}
