//! Historical page retrieval.
//!
//! The backend hands back rows newest-first; the fetcher decodes them into
//! [`MessageRecord`]s and reverses them so callers always receive pages in
//! timeline order (oldest first).

use crate::error::{DecodeError, FetchError};
use crate::record::{MessageRecord, Timestamp, parse_timestamp};
use crate::scope::ScopeFilter;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Records requested per page unless configured otherwise
pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Query sent to the historical store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub scope: ScopeFilter,
    /// Only rows strictly older than this; unbounded when `None`
    pub before: Option<Timestamp>,
    pub limit: usize,
}

/// One row as the backend stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: String,
    #[serde(alias = "isAgent")]
    pub is_agent: bool,
    /// ISO 8601 creation time
    #[serde(alias = "createdAt")]
    pub created_at: String,
}

impl StoredMessage {
    pub fn new(message: impl Into<String>, is_agent: bool, created_at: impl Into<String>) -> Self {
        Self { message: message.into(), is_agent, created_at: created_at.into() }
    }
}

/// Backend holding the durable conversation log
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Up to `query.limit` rows older than `query.before`, newest first
    async fn query(&self, query: HistoryQuery) -> Result<Vec<StoredMessage>, FetchError>;
}

#[async_trait::async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn query(&self, query: HistoryQuery) -> Result<Vec<StoredMessage>, FetchError> {
        (**self).query(query).await
    }
}

/// Source of historical pages in timeline order
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch up to `limit` records strictly older than `cursor`, oldest first.
    ///
    /// An empty page means the start of history was reached.
    async fn fetch_page(
        &self, cursor: Option<Timestamp>, limit: usize, cancel: &CancellationToken,
    ) -> Result<Vec<MessageRecord>, FetchError>;
}

/// Decode a newest-first page of rows.
///
/// Any undecodable row fails the whole page.
pub fn decode_page(rows: Vec<StoredMessage>) -> Result<Vec<MessageRecord>, DecodeError> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| {
            let timestamp = parse_timestamp(&row.created_at)
                .ok_or_else(|| DecodeError::InvalidTimestamp { index, value: row.created_at.clone() })?;
            Ok(MessageRecord::historical(&row.message, row.is_agent, timestamp))
        })
        .collect()
}

/// Decode a JSON array of stored rows, reporting the first bad element
pub fn decode_stored_json(json: &str) -> Result<Vec<StoredMessage>, DecodeError> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| DecodeError::Malformed { index: 0, reason: e.to_string() })?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed { index, reason: e.to_string() })
        })
        .collect()
}

/// [`PageFetcher`] backed by a [`HistoryStore`] and a fixed identity scope
pub struct StorePageFetcher<S> {
    store: S,
    scope: ScopeFilter,
    timeout: Option<Duration>,
}

impl<S: HistoryStore> StorePageFetcher<S> {
    pub fn new(store: S, scope: ScopeFilter) -> Self {
        Self { store, scope, timeout: None }
    }

    /// Bound each backend query; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    async fn query_with_timeout(&self, query: HistoryQuery) -> Result<Vec<StoredMessage>, FetchError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.query(query))
                .await
                .map_err(|_| FetchError::Timeout(limit))?,
            None => self.store.query(query).await,
        }
    }
}

#[async_trait::async_trait]
impl<S: HistoryStore> PageFetcher for StorePageFetcher<S> {
    #[instrument(skip(self, cancel), fields(scope = %self.scope))]
    async fn fetch_page(
        &self, cursor: Option<Timestamp>, limit: usize, cancel: &CancellationToken,
    ) -> Result<Vec<MessageRecord>, FetchError> {
        let query = HistoryQuery { scope: self.scope.clone(), before: cursor, limit };

        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Page fetch cancelled");
                return Err(FetchError::Cancelled);
            }
            rows = self.query_with_timeout(query) => rows?,
        };

        let mut records = decode_page(rows)?;
        records.reverse();
        tracing::debug!("Fetched page of {} records", records.len());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        rows: Vec<StoredMessage>,
        queries: Mutex<Vec<HistoryQuery>>,
        delay: Option<Duration>,
        fail: Option<FetchError>,
    }

    #[async_trait::async_trait]
    impl HistoryStore for RecordingStore {
        async fn query(&self, query: HistoryQuery) -> Result<Vec<StoredMessage>, FetchError> {
            self.queries.lock().unwrap().push(query);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail {
                Some(err) => Err(err.clone()),
                None => Ok(self.rows.clone()),
            }
        }
    }

    fn newest_first_rows() -> Vec<StoredMessage> {
        vec![
            StoredMessage::new("third", true, "2025-11-01T10:02:00Z"),
            StoredMessage::new("second", false, "2025-11-01T10:01:00Z"),
            StoredMessage::new("first", true, "2025-11-01T10:00:00Z"),
        ]
    }

    #[tokio::test]
    async fn test_fetch_page_reverses_to_oldest_first() {
        let store = RecordingStore { rows: newest_first_rows(), ..Default::default() };
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Device("d1".to_string()));

        let page = fetcher.fetch_page(None, 15, &CancellationToken::new()).await.unwrap();
        let texts: Vec<_> = page.iter().map(|r| r.content.text().unwrap()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        assert!(page.iter().all(|r| r.is_historical()));
    }

    #[tokio::test]
    async fn test_fetch_page_sends_scope_cursor_and_limit() {
        let store = RecordingStore::default();
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Principal("user-7".to_string()));
        let cursor = Utc.with_ymd_and_hms(2025, 11, 1, 10, 0, 0).unwrap();

        let page = fetcher.fetch_page(Some(cursor), 15, &CancellationToken::new()).await.unwrap();
        assert!(page.is_empty());

        let queries = fetcher.store.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0],
            HistoryQuery { scope: ScopeFilter::Principal("user-7".to_string()), before: Some(cursor), limit: 15 }
        );
    }

    #[tokio::test]
    async fn test_decode_failure_rejects_whole_page() {
        let mut rows = newest_first_rows();
        rows[1].created_at = "garbage".to_string();
        let store = RecordingStore { rows, ..Default::default() };
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Device("d1".to_string()));

        let err = fetcher.fetch_page(None, 15, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            FetchError::Decode(DecodeError::InvalidTimestamp { index: 1, value: "garbage".to_string() })
        );
    }

    #[tokio::test]
    async fn test_backend_error_passes_through() {
        let store = RecordingStore { fail: Some(FetchError::network("503")), ..Default::default() };
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Device("d1".to_string()));

        let err = fetcher.fetch_page(None, 15, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, FetchError::network("503"));
    }

    #[tokio::test]
    async fn test_cancelled_before_completion() {
        let store = RecordingStore { delay: Some(Duration::from_secs(60)), ..Default::default() };
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Device("d1".to_string()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher.fetch_page(None, 15, &cancel).await.unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_expires() {
        let store = RecordingStore { delay: Some(Duration::from_secs(60)), ..Default::default() };
        let fetcher = StorePageFetcher::new(store, ScopeFilter::Device("d1".to_string()))
            .with_timeout(Some(Duration::from_millis(20)));

        let err = fetcher.fetch_page(None, 15, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(20)));
    }

    #[test]
    fn test_decode_stored_json_accepts_camel_case() {
        let json = r#"[
            {"message": "hi", "isAgent": true, "createdAt": "2025-11-01T10:00:00Z"},
            {"message": "MEDIA:https://example.com/a.png", "is_agent": false, "created_at": "2025-11-01T09:00:00Z"}
        ]"#;
        let rows = decode_stored_json(json).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_agent);
        assert_eq!(rows[1].created_at, "2025-11-01T09:00:00Z");
    }

    #[test]
    fn test_decode_stored_json_reports_bad_index() {
        let json = r#"[
            {"message": "hi", "isAgent": true, "createdAt": "2025-11-01T10:00:00Z"},
            {"isAgent": true, "createdAt": "2025-11-01T10:00:00Z"}
        ]"#;
        match decode_stored_json(json) {
            Err(DecodeError::Malformed { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("message"));
            }
            other => panic!("Expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_page_derives_stable_ids() {
        let first = decode_page(newest_first_rows()).unwrap();
        let second = decode_page(newest_first_rows()).unwrap();
        let first_ids: Vec<_> = first.iter().map(|r| r.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|r| r.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }
}
