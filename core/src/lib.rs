pub mod html;
pub mod lemmas;
pub mod model;
pub mod morphology;
pub mod persist;
pub mod store;

pub use lemmas::{LemmaCounts, LemmaExtractor};
pub use model::{IndexStatus, Lemma, LemmaId, NewPage, Page, PageId, Posting, Site, SiteId, UNREACHABLE_STATUS};
pub use persist::SledStore;
pub use store::{Store, StoreError, StoreResult};
