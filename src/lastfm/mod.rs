//! Remote paging client for the Last.fm recent-tracks feed.
//!
//! A pure fetch boundary: pages come back newest-first and nothing here
//! deduplicates or persists.

pub mod client;
pub mod error;
mod responses;

pub use client::{Credentials, LastFmClient};
pub use error::FetchError;

use crate::state::ScrobbleRecord;

/// One page request. `from`/`to` are inclusive unix-second bounds; leave
/// both unset to page through the whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl PageRequest {
    /// Page `page` (1-based) of the unbounded history.
    pub fn page(page: u32) -> Self {
        Self {
            page,
            from: None,
            to: None,
        }
    }

    /// Page `page` of the scrobbles played between `from` and `to`.
    pub fn in_range(page: u32, from: i64, to: i64) -> Self {
        Self {
            page,
            from: Some(from),
            to: Some(to),
        }
    }
}

/// A fetched page, newest scrobble first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrobblePage {
    pub records: Vec<ScrobbleRecord>,
    pub page: u32,
    pub total_pages: u32,
    pub has_more: bool,
}

/// Anything that can serve pages of a listening history.
#[async_trait::async_trait]
pub trait ScrobbleSource: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<ScrobblePage, FetchError>;
}
