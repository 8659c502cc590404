use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;

/// Status code stored for a page whose fetch failed before any HTTP response arrived.
pub const UNREACHABLE_STATUS: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexStatus {
    Indexing,
    Indexed,
    Failed,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexStatus::Indexing => "INDEXING",
            IndexStatus::Indexed => "INDEXED",
            IndexStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    /// Scheme and host only, e.g. `https://example.com`.
    pub url: String,
    pub name: String,
    pub status: IndexStatus,
    /// RFC 3339 timestamp of the last status change.
    pub status_time: String,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    /// Site-relative path; `/` for the site root.
    pub path: String,
    pub code: u16,
    pub content: String,
}

impl Page {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// A page as handed to the store before it has an id.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub lemma: String,
    /// Number of pages of the site holding a posting for this lemma.
    pub frequency: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    pub rank: f32,
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
