//! Shared fixtures for unit tests: record builders and a scripted upstream.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::lastfm::{FetchError, PageRequest, ScrobblePage, ScrobbleSource};
use crate::state::{ScrobbleRecord, ScrobbleStore, SqliteScrobbleStore};

pub(crate) fn scrobble(timestamp: i64) -> ScrobbleRecord {
    ScrobbleRecord {
        artist: format!("Artist {}", timestamp % 7),
        artist_external_id: None,
        album: Some(format!("Album {}", timestamp % 5)),
        album_external_id: None,
        track: format!("Track {timestamp}"),
        track_external_id: None,
        timestamp,
    }
}

/// In-memory store holding one scrobble per timestamp.
pub(crate) async fn seeded_store(timestamps: impl IntoIterator<Item = i64>) -> SqliteScrobbleStore {
    let store = SqliteScrobbleStore::open_in_memory().unwrap();
    for ts in timestamps {
        store.insert_if_absent(&scrobble(ts)).await.unwrap();
    }
    store
}

/// Every stored timestamp, oldest first.
pub(crate) async fn stored_timestamps(store: &dyn ScrobbleStore) -> Vec<i64> {
    store
        .records_in_range(i64::MIN, i64::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.timestamp)
        .collect()
}

/// In-memory upstream serving a fixed history newest-first.
///
/// Errors queued with [`FakeSource::fail_next`] are returned, one per call,
/// before any page is served; errors queued with [`FakeSource::fail_page`]
/// only for requests of that page. Every request is recorded.
pub(crate) struct FakeSource {
    /// Newest first.
    history: Vec<ScrobbleRecord>,
    page_size: usize,
    failures: Mutex<VecDeque<FetchError>>,
    page_failures: Mutex<HashMap<u32, VecDeque<FetchError>>>,
    cancel_after: Mutex<Option<(u32, CancellationToken)>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl FakeSource {
    /// `timestamps` in any order; they are served newest first.
    pub(crate) fn new(timestamps: impl IntoIterator<Item = i64>, page_size: usize) -> Self {
        let mut history: Vec<_> = timestamps.into_iter().map(scrobble).collect();
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self::with_history(history, page_size)
    }

    /// Serve `timestamps` in exactly the given order.
    pub(crate) fn in_order(timestamps: impl IntoIterator<Item = i64>, page_size: usize) -> Self {
        Self::with_history(timestamps.into_iter().map(scrobble).collect(), page_size)
    }

    fn with_history(history: Vec<ScrobbleRecord>, page_size: usize) -> Self {
        Self {
            history,
            page_size,
            failures: Mutex::new(VecDeque::new()),
            page_failures: Mutex::new(HashMap::new()),
            cancel_after: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_next(&self, error: FetchError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fail_page(&self, page: u32, error: FetchError) {
        self.page_failures
            .lock()
            .unwrap()
            .entry(page)
            .or_default()
            .push_back(error);
    }

    /// Cancel `token` right after page `page` has been served.
    pub(crate) fn cancel_after(&self, page: u32, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((page, token));
    }

    pub(crate) fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ScrobbleSource for FakeSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<ScrobblePage, FetchError> {
        self.requests.lock().unwrap().push(request);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let page_failure = self
            .page_failures
            .lock()
            .unwrap()
            .get_mut(&request.page)
            .and_then(VecDeque::pop_front);
        if let Some(err) = page_failure {
            return Err(err);
        }

        let matching: Vec<&ScrobbleRecord> = self
            .history
            .iter()
            .filter(|r| request.from.map_or(true, |from| r.timestamp >= from))
            .filter(|r| request.to.map_or(true, |to| r.timestamp <= to))
            .collect();

        let total_pages = matching.len().div_ceil(self.page_size) as u32;
        let start = (request.page.saturating_sub(1) as usize) * self.page_size;
        let records = matching
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .cloned()
            .collect();

        if let Some((page, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *page == request.page {
                token.cancel();
            }
        }

        Ok(ScrobblePage {
            records,
            page: request.page,
            total_pages,
            has_more: request.page < total_pages,
        })
    }
}
