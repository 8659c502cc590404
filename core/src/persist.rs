use crate::model::{
    now_rfc3339, IndexStatus, Lemma, LemmaId, NewPage, Page, PageId, Posting, Site, SiteId,
};
use crate::store::{Store, StoreError, StoreResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct LemmaRow {
    site_id: SiteId,
    lemma: String,
}

/// sled-backed store. Keys are big-endian ids so prefix scans group by owner.
///
/// | tree             | key                 | value          |
/// |------------------|---------------------|----------------|
/// | `sites`          | site id             | `Site`         |
/// | `site_urls`      | url                 | site id        |
/// | `pages`          | page id             | `Page`         |
/// | `page_paths`     | site id ++ path     | page id        |
/// | `lemmas`         | lemma id            | `LemmaRow`     |
/// | `lemma_keys`     | site id ++ lemma    | lemma id       |
/// | `frequencies`    | lemma id            | u32            |
/// | `postings`       | page id ++ lemma id | rank (f32)     |
/// | `lemma_postings` | lemma id ++ page id | empty          |
pub struct SledStore {
    db: Db,
    sites: Tree,
    site_urls: Tree,
    pages: Tree,
    page_paths: Tree,
    lemmas: Tree,
    lemma_keys: Tree,
    frequencies: Tree,
    postings: Tree,
    lemma_postings: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// Store backed by a throwaway directory, removed on drop.
    pub fn temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            site_urls: db.open_tree("site_urls")?,
            pages: db.open_tree("pages")?,
            page_paths: db.open_tree("page_paths")?,
            lemmas: db.open_tree("lemmas")?,
            lemma_keys: db.open_tree("lemma_keys")?,
            frequencies: db.open_tree("frequencies")?,
            postings: db.open_tree("postings")?,
            lemma_postings: db.open_tree("lemma_postings")?,
            db,
        })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn frequency(&self, lemma: LemmaId) -> StoreResult<u32> {
        match self.frequencies.get(id_key(lemma))? {
            Some(v) => decode_u32(&v, "frequencies"),
            None => Ok(0),
        }
    }

    fn load_lemma(&self, id: LemmaId) -> StoreResult<Option<Lemma>> {
        let Some(bytes) = self.lemmas.get(id_key(id))? else { return Ok(None) };
        let row: LemmaRow = decode(&bytes)?;
        Ok(Some(Lemma { id, site_id: row.site_id, lemma: row.lemma, frequency: self.frequency(id)? }))
    }

    fn lemma_or_create(&self, site: SiteId, text: &str) -> StoreResult<Lemma> {
        let key = owned_key(site, text.as_bytes());
        if let Some(id) = self.lemma_keys.get(&key)? {
            let id = decode_u64(&id, "lemma_keys")?;
            return self.load_lemma(id)?.ok_or(StoreError::NotFound { kind: "lemma", id });
        }
        let id = self.db.generate_id()?;
        let row = LemmaRow { site_id: site, lemma: text.to_string() };
        self.lemmas.insert(id_key(id), encode(&row)?)?;
        self.frequencies.insert(id_key(id), &0u32.to_be_bytes()[..])?;
        let claimed = self.lemma_keys.compare_and_swap(&key, None as Option<&[u8]>, Some(&id_key(id)[..]))?;
        if claimed.is_err() {
            // another writer registered the same lemma first
            self.lemmas.remove(id_key(id))?;
            self.frequencies.remove(id_key(id))?;
            return self.lemma_or_create(site, text);
        }
        Ok(Lemma { id, site_id: site, lemma: text.to_string(), frequency: 0 })
    }
}

impl Store for SledStore {
    fn site_by_url(&self, url: &str) -> StoreResult<Option<Site>> {
        match self.site_urls.get(url.as_bytes())? {
            Some(id) => self.site(decode_u64(&id, "site_urls")?),
            None => Ok(None),
        }
    }

    fn site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        self.sites.get(id_key(id))?.map(|v| decode(&v)).transpose()
    }

    fn site_or_create(&self, url: &str, name: &str) -> StoreResult<Site> {
        if let Some(site) = self.site_by_url(url)? {
            return Ok(site);
        }
        let site = Site {
            id: self.db.generate_id()?,
            url: url.to_string(),
            name: name.to_string(),
            status: IndexStatus::Indexing,
            status_time: now_rfc3339(),
            last_error: None,
        };
        self.sites.insert(id_key(site.id), encode(&site)?)?;
        let claimed = self
            .site_urls
            .compare_and_swap(url.as_bytes(), None as Option<&[u8]>, Some(&id_key(site.id)[..]))?;
        if claimed.is_err() {
            self.sites.remove(id_key(site.id))?;
            return self.site_or_create(url, name);
        }
        tracing::debug!(site_id = site.id, url, "site created");
        Ok(site)
    }

    fn sites(&self) -> StoreResult<Vec<Site>> {
        self.sites.iter().values().map(|v| decode(&v?)).collect()
    }

    fn delete_site(&self, id: SiteId) -> StoreResult<()> {
        let Some(site) = self.site(id)? else { return Ok(()) };
        let page_ids = self
            .page_paths
            .scan_prefix(id_key(id))
            .values()
            .map(|v| decode_u64(&v?, "page_paths"))
            .collect::<StoreResult<Vec<_>>>()?;
        for page in page_ids {
            self.delete_page(page)?;
        }
        for entry in self.lemma_keys.scan_prefix(id_key(id)) {
            let (key, lemma) = entry?;
            let lemma = decode_u64(&lemma, "lemma_keys")?;
            self.lemmas.remove(id_key(lemma))?;
            self.frequencies.remove(id_key(lemma))?;
            self.lemma_keys.remove(key)?;
        }
        self.site_urls.remove(site.url.as_bytes())?;
        self.sites.remove(id_key(id))?;
        tracing::debug!(site_id = id, url = %site.url, "site removed");
        Ok(())
    }

    fn update_site_status(&self, id: SiteId, status: IndexStatus, error: Option<String>) -> StoreResult<()> {
        let mut site = self.site(id)?.ok_or(StoreError::NotFound { kind: "site", id })?;
        site.status = status;
        site.status_time = now_rfc3339();
        site.last_error = error;
        self.sites.insert(id_key(id), encode(&site)?)?;
        Ok(())
    }

    fn any_site_indexing(&self) -> StoreResult<bool> {
        Ok(self.sites()?.iter().any(|s| s.status == IndexStatus::Indexing))
    }

    fn page(&self, id: PageId) -> StoreResult<Option<Page>> {
        self.pages.get(id_key(id))?.map(|v| decode(&v)).transpose()
    }

    fn page_by_path(&self, site: SiteId, path: &str) -> StoreResult<Option<Page>> {
        match self.page_paths.get(owned_key(site, path.as_bytes()))? {
            Some(id) => self.page(decode_u64(&id, "page_paths")?),
            None => Ok(None),
        }
    }

    fn save_page(&self, page: NewPage) -> StoreResult<Page> {
        let key = owned_key(page.site_id, page.path.as_bytes());
        if let Some(id) = self.page_paths.get(&key)? {
            let stored = Page {
                id: decode_u64(&id, "page_paths")?,
                site_id: page.site_id,
                path: page.path,
                code: page.code,
                content: page.content,
            };
            self.pages.insert(id_key(stored.id), encode(&stored)?)?;
            return Ok(stored);
        }
        let stored = Page {
            id: self.db.generate_id()?,
            site_id: page.site_id,
            path: page.path,
            code: page.code,
            content: page.content,
        };
        self.pages.insert(id_key(stored.id), encode(&stored)?)?;
        let claimed = self.page_paths.compare_and_swap(&key, None as Option<&[u8]>, Some(&id_key(stored.id)[..]))?;
        if claimed.is_err() {
            self.pages.remove(id_key(stored.id))?;
            let Page { site_id, path, code, content, .. } = stored;
            return self.save_page(NewPage { site_id, path, code, content });
        }
        Ok(stored)
    }

    fn delete_page(&self, id: PageId) -> StoreResult<()> {
        let Some(page) = self.page(id)? else { return Ok(()) };
        let postings = self.postings_for_page(id)?;
        let path_key = owned_key(page.site_id, page.path.as_bytes());

        (&self.pages, &self.page_paths, &self.postings, &self.lemma_postings, &self.frequencies)
            .transaction(|(pages, paths, postings_tx, lemma_postings, frequencies)| {
                pages.remove(&id_key(id)[..])?;
                paths.remove(path_key.as_slice())?;
                for posting in &postings {
                    postings_tx.remove(&pair_key(id, posting.lemma_id)[..])?;
                    lemma_postings.remove(&pair_key(posting.lemma_id, id)[..])?;
                    let current = match frequencies.get(&id_key(posting.lemma_id)[..])? {
                        Some(v) => decode_u32(&v, "frequencies").map_err(ConflictableTransactionError::Abort)?,
                        None => 0,
                    };
                    frequencies.insert(&id_key(posting.lemma_id)[..], &current.saturating_sub(1).to_be_bytes()[..])?;
                }
                Ok(())
            })
            .map_err(tx_error)?;
        tracing::trace!(page_id = id, postings = postings.len(), "page removed");
        Ok(())
    }

    fn count_pages(&self, site: SiteId) -> StoreResult<usize> {
        Ok(self.page_paths.scan_prefix(id_key(site)).count())
    }

    fn lemma(&self, site: SiteId, lemma: &str) -> StoreResult<Option<Lemma>> {
        match self.lemma_keys.get(owned_key(site, lemma.as_bytes()))? {
            Some(id) => self.load_lemma(decode_u64(&id, "lemma_keys")?),
            None => Ok(None),
        }
    }

    fn lemmas_or_create(&self, site: SiteId, lemmas: &[String]) -> StoreResult<Vec<Lemma>> {
        lemmas.iter().map(|text| self.lemma_or_create(site, text)).collect()
    }

    fn adjust_frequencies(&self, lemmas: &[LemmaId], delta: i64) -> StoreResult<()> {
        for &lemma in lemmas {
            self.frequencies.update_and_fetch(id_key(lemma), |old| {
                let current = old
                    .and_then(|b| <[u8; 4]>::try_from(b).ok())
                    .map(u32::from_be_bytes)
                    .unwrap_or(0);
                let next = (i64::from(current) + delta).clamp(0, i64::from(u32::MAX)) as u32;
                Some(next.to_be_bytes().to_vec())
            })?;
        }
        Ok(())
    }

    fn count_lemmas(&self, site: SiteId) -> StoreResult<usize> {
        Ok(self.lemma_keys.scan_prefix(id_key(site)).count())
    }

    fn save_postings(&self, page: PageId, postings: &[(LemmaId, f32)]) -> StoreResult<()> {
        (&self.postings, &self.lemma_postings)
            .transaction(|(postings_tx, lemma_postings)| {
                for &(lemma, rank) in postings {
                    postings_tx.insert(&pair_key(page, lemma)[..], &rank.to_be_bytes()[..])?;
                    lemma_postings.insert(&pair_key(lemma, page)[..], Vec::<u8>::new())?;
                }
                Ok(())
            })
            .map_err(tx_error)
    }

    fn posting(&self, page: PageId, lemma: LemmaId) -> StoreResult<Option<Posting>> {
        match self.postings.get(pair_key(page, lemma))? {
            Some(rank) => Ok(Some(Posting { page_id: page, lemma_id: lemma, rank: decode_f32(&rank)? })),
            None => Ok(None),
        }
    }

    fn postings_for_page(&self, page: PageId) -> StoreResult<Vec<Posting>> {
        self.postings
            .scan_prefix(id_key(page))
            .map(|entry| {
                let (key, rank) = entry?;
                Ok(Posting { page_id: page, lemma_id: decode_u64(&key[8..], "postings")?, rank: decode_f32(&rank)? })
            })
            .collect()
    }

    fn postings_for_lemma(&self, lemma: LemmaId) -> StoreResult<Vec<Posting>> {
        let mut out = Vec::new();
        for key in self.lemma_postings.scan_prefix(id_key(lemma)).keys() {
            let page = decode_u64(&key?[8..], "lemma_postings")?;
            if let Some(posting) = self.posting(page, lemma)? {
                out.push(posting);
            }
        }
        Ok(out)
    }

    fn rank_sum(&self, page: PageId, lemmas: &[LemmaId]) -> StoreResult<f64> {
        let mut sum = 0.0;
        for &lemma in lemmas {
            if let Some(p) = self.posting(page, lemma)? {
                sum += f64::from(p.rank);
            }
        }
        Ok(sum)
    }
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

fn owned_key(owner: u64, rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + rest.len());
    key.extend_from_slice(&owner.to_be_bytes());
    key.extend_from_slice(rest);
    key
}

fn decode_u64(bytes: &[u8], tree: &'static str) -> StoreResult<u64> {
    <[u8; 8]>::try_from(bytes).map(u64::from_be_bytes).map_err(|_| StoreError::Corrupt(tree))
}

fn decode_u32(bytes: &[u8], tree: &'static str) -> StoreResult<u32> {
    <[u8; 4]>::try_from(bytes).map(u32::from_be_bytes).map_err(|_| StoreError::Corrupt(tree))
}

fn decode_f32(bytes: &[u8]) -> StoreResult<f32> {
    <[u8; 4]>::try_from(bytes).map(f32::from_be_bytes).map_err(|_| StoreError::Corrupt("postings"))
}

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn tx_error(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Db(e),
    }
}
