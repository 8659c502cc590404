use crate::model::{IndexStatus, Lemma, LemmaId, NewPage, Page, PageId, Posting, Site, SiteId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Db(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt record in tree {0}")]
    Corrupt(&'static str),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations the crawl, index and search layers rely on.
///
/// Implementations must keep three invariants on their own: a lemma's
/// frequency equals the number of postings referencing it, `(site, path)` is
/// unique among pages, and `(site, lemma)` is unique among lemmas.
pub trait Store: Send + Sync {
    fn site_by_url(&self, url: &str) -> StoreResult<Option<Site>>;
    fn site(&self, id: SiteId) -> StoreResult<Option<Site>>;
    /// Returns the existing site for `url`, or creates it with status `INDEXING`.
    fn site_or_create(&self, url: &str, name: &str) -> StoreResult<Site>;
    fn sites(&self) -> StoreResult<Vec<Site>>;
    /// Removes the site together with all of its pages, lemmas and postings.
    fn delete_site(&self, id: SiteId) -> StoreResult<()>;
    fn update_site_status(&self, id: SiteId, status: IndexStatus, error: Option<String>) -> StoreResult<()>;
    fn any_site_indexing(&self) -> StoreResult<bool>;

    fn page(&self, id: PageId) -> StoreResult<Option<Page>>;
    fn page_by_path(&self, site: SiteId, path: &str) -> StoreResult<Option<Page>>;
    /// Inserts the page, or overwrites code and content of the page already stored at `(site, path)`.
    fn save_page(&self, page: NewPage) -> StoreResult<Page>;
    /// Deletes the page, its postings, and decrements the frequency of every lemma it contributed.
    fn delete_page(&self, id: PageId) -> StoreResult<()>;
    fn count_pages(&self, site: SiteId) -> StoreResult<usize>;

    fn lemma(&self, site: SiteId, lemma: &str) -> StoreResult<Option<Lemma>>;
    /// Get-or-create for each text; new rows start at frequency 0.
    fn lemmas_or_create(&self, site: SiteId, lemmas: &[String]) -> StoreResult<Vec<Lemma>>;
    fn adjust_frequencies(&self, lemmas: &[LemmaId], delta: i64) -> StoreResult<()>;
    fn count_lemmas(&self, site: SiteId) -> StoreResult<usize>;

    /// Writes all postings of one page so they become visible together.
    fn save_postings(&self, page: PageId, postings: &[(LemmaId, f32)]) -> StoreResult<()>;
    fn posting(&self, page: PageId, lemma: LemmaId) -> StoreResult<Option<Posting>>;
    fn postings_for_page(&self, page: PageId) -> StoreResult<Vec<Posting>>;
    fn postings_for_lemma(&self, lemma: LemmaId) -> StoreResult<Vec<Posting>>;
    /// Sum of the page's posting ranks over the given lemmas.
    fn rank_sum(&self, page: PageId, lemmas: &[LemmaId]) -> StoreResult<f64>;
}
