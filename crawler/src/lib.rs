pub mod fetch;
pub mod links;
pub mod robots;
pub mod walker;

pub use fetch::{FetchError, FetchSettings, HttpFetcher, PageFetcher, Response};
pub use walker::{FetchedPage, WalkConfig, WalkError, WalkReport, WalkState, Walker};
