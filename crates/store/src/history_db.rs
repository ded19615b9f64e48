//! SQLite-backed conversation history
//!
//! Answers the historical store query: up to `limit` rows for one identity
//! scope, strictly older than a cursor, newest first.
use crate::error::{Error, Result};
use crate::migration::MigrationManager;

use murmur_core::{
    FetchError, HistoryQuery, HistoryStore, ScopeFilter, StoredMessage, Timestamp, format_timestamp, parse_timestamp,
};
use rusqlite::params;
use std::{path::Path, sync::Arc};
use tokio_rusqlite::Connection;
use tracing::instrument;

/// A handle to the message log
#[derive(Clone)]
pub struct HistoryDb {
    conn: Arc<Connection>,
}

/// `(principal_id, device_id)` column values for a scope
fn scope_params(scope: &ScopeFilter) -> Result<(Option<String>, Option<String>)> {
    if scope.id().trim().is_empty() {
        return Err(Error::InvalidScope(format!("blank {}", scope.column())));
    }

    Ok(match scope {
        ScopeFilter::Principal(id) => (Some(id.clone()), None),
        ScopeFilter::Device(id) => (None, Some(id.clone())),
    })
}

impl HistoryDb {
    /// Open or create a history database at the given path
    #[instrument(skip_all, fields(db_path = %db_path.display()))]
    pub async fn open(db_path: &Path) -> Result<Self> {
        tracing::info!("Opening history store at {}", db_path.display());

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .await
            .map_err(|e| Error::database(format!("Failed to open database: {e}")))?;

        Self::migrate(conn).await
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::database(format!("Failed to open database: {e}")))?;

        Self::migrate(conn).await
    }

    async fn migrate(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            tracing::debug!("Running migrations");
            MigrationManager::migrate(conn).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tracing::trace!("Migrations complete");
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .map_err(|e| Error::database(format!("Migration failed: {e}")))?;

        Ok(Self { conn: Arc::new(conn) })
    }

    /// Append one message; returns its row id
    #[instrument(skip(self, message), fields(scope = %scope))]
    pub async fn insert(&self, scope: &ScopeFilter, message: &str, is_agent: bool, created_at: Timestamp) -> Result<i64> {
        let (principal_id, device_id) = scope_params(scope)?;
        let message = message.to_owned();
        let created_at = format_timestamp(&created_at);

        let row_id = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO messages (principal_id, device_id, message, is_agent, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                stmt.execute(params![principal_id, device_id, message, is_agent, created_at])?;
                Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
            })
            .await?;

        tracing::trace!(row_id, "Message stored");
        Ok(row_id)
    }

    /// Insert rows in a single transaction.
    ///
    /// Every `created_at` is validated first; one bad row rejects the batch.
    #[instrument(skip(self, rows), fields(scope = %scope, count = rows.len()))]
    pub async fn insert_many(&self, scope: &ScopeFilter, rows: Vec<StoredMessage>) -> Result<usize> {
        let (principal_id, device_id) = scope_params(scope)?;

        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                let created_at = parse_timestamp(&row.created_at)
                    .ok_or_else(|| Error::invalid_record(index, format!("invalid timestamp '{}'", row.created_at)))?;
                Ok((row.message, row.is_agent, format_timestamp(&created_at)))
            })
            .collect::<Result<Vec<_>>>()?;

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO messages (principal_id, device_id, message, is_agent, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for (message, is_agent, created_at) in &rows {
                        stmt.execute(params![principal_id, device_id, message, is_agent, created_at])?;
                    }
                }
                tx.commit()?;
                Ok::<_, rusqlite::Error>(rows.len())
            })
            .await?;

        tracing::debug!("Inserted {} messages", inserted);
        Ok(inserted)
    }

    /// Parse a JSON array of rows and insert them
    pub async fn import_json(&self, scope: &ScopeFilter, json: &str) -> Result<usize> {
        let rows: Vec<StoredMessage> = serde_json::from_str(json)?;
        self.insert_many(scope, rows).await
    }

    /// One page of rows strictly older than `query.before`, newest first
    #[instrument(skip(self), fields(scope = %query.scope, before = ?query.before, limit = query.limit))]
    pub async fn page(&self, query: &HistoryQuery) -> Result<Vec<StoredMessage>> {
        scope_params(&query.scope)?;

        let sql = format!(
            "SELECT message, is_agent, created_at FROM messages \
             WHERE {} = ?1 AND (?2 IS NULL OR created_at < ?2) \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
            query.scope.column()
        );
        let scope_id = query.scope.id().to_owned();
        let before = query.before.as_ref().map(format_timestamp);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(params![scope_id, before, limit], |row| {
                        Ok(StoredMessage { message: row.get(0)?, is_agent: row.get(1)?, created_at: row.get(2)? })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await?;

        tracing::debug!("Page returned {} rows", rows.len());
        Ok(rows)
    }

    /// Number of messages stored for a scope
    #[instrument(skip(self), fields(scope = %scope))]
    pub async fn count(&self, scope: &ScopeFilter) -> Result<usize> {
        scope_params(scope)?;

        let sql = format!("SELECT COUNT(*) FROM messages WHERE {} = ?1", scope.column());
        let scope_id = scope.id().to_owned();

        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(&sql, params![scope_id], |row| row.get(0))?;
                Ok::<_, rusqlite::Error>(count)
            })
            .await?;

        Ok(count as usize)
    }
}

#[async_trait::async_trait]
impl HistoryStore for HistoryDb {
    async fn query(&self, query: HistoryQuery) -> std::result::Result<Vec<StoredMessage>, FetchError> {
        self.page(&query).await.map_err(|e| {
            tracing::warn!(error = %e, "History query failed");
            FetchError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use murmur_core::{PageFetcher, StorePageFetcher};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn at(minute: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn device() -> ScopeFilter {
        ScopeFilter::Device("device-1".to_string())
    }

    async fn seeded(count: i64) -> HistoryDb {
        let db = HistoryDb::open_in_memory().await.unwrap();
        for m in 0..count {
            db.insert(&device(), &format!("message {m}"), m % 2 == 0, at(m)).await.unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("history.db");

        let db = tokio_test::assert_ok!(HistoryDb::open(&db_path).await);
        assert!(db_path.exists());
        assert_eq!(tokio_test::assert_ok!(db.count(&device()).await), 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("history.db");

        {
            let db = HistoryDb::open(&db_path).await.unwrap();
            db.insert(&device(), "persisted", true, at(0)).await.unwrap();
        }

        let db = HistoryDb::open(&db_path).await.unwrap();
        assert_eq!(db.count(&device()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_is_newest_first_and_limited() {
        let db = seeded(20).await;
        let query = HistoryQuery { scope: device(), before: None, limit: 15 };

        let rows = db.page(&query).await.unwrap();
        assert_eq!(rows.len(), 15);
        assert_eq!(rows[0].message, "message 19");
        assert_eq!(rows[14].message, "message 5");
        assert_eq!(rows[0].created_at, "2025-11-01T12:19:00.000000Z");
    }

    #[tokio::test]
    async fn test_page_is_strictly_before_cursor() {
        let db = seeded(20).await;
        let query = HistoryQuery { scope: device(), before: Some(at(5)), limit: 15 };

        let rows = db.page(&query).await.unwrap();
        let messages: Vec<_> = rows.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["message 4", "message 3", "message 2", "message 1", "message 0"]);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let db = HistoryDb::open_in_memory().await.unwrap();
        let principal = ScopeFilter::Principal("user-1".to_string());
        db.insert(&principal, "signed in", false, at(1)).await.unwrap();
        db.insert(&device(), "anonymous", false, at(2)).await.unwrap();
        db.insert(&ScopeFilter::Device("user-1".to_string()), "same id, other column", false, at(3))
            .await
            .unwrap();

        let rows = db.page(&HistoryQuery { scope: principal.clone(), before: None, limit: 15 }).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "signed in");
        assert_eq!(db.count(&principal).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_scope_rejected() {
        let db = HistoryDb::open_in_memory().await.unwrap();
        let err = db.insert(&ScopeFilter::Device("  ".to_string()), "x", false, at(0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidScope(_)));
    }

    #[tokio::test]
    async fn test_insert_many_normalizes_timestamps() {
        let db = HistoryDb::open_in_memory().await.unwrap();
        let rows = vec![
            StoredMessage::new("offset", true, "2025-11-01T14:00:00+02:00"),
            StoredMessage::new("naive", false, "2025-11-01 12:30:00"),
        ];

        assert_eq!(db.insert_many(&device(), rows).await.unwrap(), 2);

        let page = db.page(&HistoryQuery { scope: device(), before: None, limit: 15 }).await.unwrap();
        assert_eq!(page[0].message, "naive");
        assert_eq!(page[0].created_at, "2025-11-01T12:30:00.000000Z");
        assert_eq!(page[1].created_at, "2025-11-01T12:00:00.000000Z");
    }

    #[tokio::test]
    async fn test_insert_many_rejects_whole_batch() {
        let db = HistoryDb::open_in_memory().await.unwrap();
        let rows = vec![
            StoredMessage::new("good", true, "2025-11-01T12:00:00Z"),
            StoredMessage::new("bad", true, "tomorrow"),
        ];

        let err = db.insert_many(&device(), rows).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { index: 1, .. }));
        assert_eq!(db.count(&device()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_import_json_accepts_backend_field_names() {
        let db = HistoryDb::open_in_memory().await.unwrap();
        let json = r#"[{"message": "hello", "isAgent": true, "createdAt": "2025-11-01T09:00:00Z"}]"#;

        assert_eq!(db.import_json(&device(), json).await.unwrap(), 1);
        assert!(matches!(db.import_json(&device(), "{not json").await, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_page_fetcher_walks_store_backwards() {
        let db = seeded(20).await;
        let fetcher = StorePageFetcher::new(db, device());
        let cancel = CancellationToken::new();

        let newest = fetcher.fetch_page(None, 15, &cancel).await.unwrap();
        assert_eq!(newest.len(), 15);
        assert_eq!(newest[0].content.text(), Some("message 5"));
        assert_eq!(newest[14].content.text(), Some("message 19"));

        let older = fetcher.fetch_page(Some(newest[0].timestamp), 15, &cancel).await.unwrap();
        assert_eq!(older.len(), 5);
        assert_eq!(older[4].content.text(), Some("message 4"));

        let none = fetcher.fetch_page(Some(older[0].timestamp), 15, &cancel).await.unwrap();
        assert!(none.is_empty());
    }
}
