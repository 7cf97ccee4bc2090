//! SQLite-backed persistent cache

use crate::{
    error::StoreError,
    store::{PersistentRecord, PersistentStore},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS market_data_cache (
    cache_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL
) WITHOUT ROWID;
"#;

/// Persistent cache in a single SQLite table
///
/// Queries run on the blocking pool; one connection is shared behind a mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;

        // WAL lets other instances read while one writes
        let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(journal_mode = %journal_mode, "WAL mode not active");
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;

        let store = Self::with_connection(conn)?;
        tracing::info!(path = path, "Persistent market data cache opened");
        Ok(store)
    }

    /// Opens a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<PersistentRecord>, StoreError> {
        let key = key.to_string();
        let row = self
            .run_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT payload, updated_at FROM market_data_cache WHERE cache_key = ?1",
                )?;
                let row = stmt
                    .query_row(params![key], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((payload, updated_at_ms)) = row else {
            return Ok(None);
        };

        let payload: Value = serde_json::from_str(&payload)?;
        let updated_at = Utc
            .timestamp_millis_opt(updated_at_ms)
            .single()
            .unwrap_or_default();

        Ok(Some(PersistentRecord {
            payload,
            updated_at,
        }))
    }

    async fn upsert(
        &self,
        key: &str,
        payload: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let payload = serde_json::to_string(payload)?;
        let updated_at_ms = updated_at.timestamp_millis();

        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO market_data_cache (cache_key, payload, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(cache_key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
                params![key, payload, updated_at_ms],
            )?;
            Ok(())
        })
        .await
    }

    fn store_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_and_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(store.get("coins/markets?vs_currency=brl").await.unwrap().is_none());

        store
            .upsert("coins/markets?vs_currency=brl", &json!([{"id": "bitcoin"}]), at(1_000))
            .await
            .unwrap();
        store
            .upsert("coins/markets?vs_currency=brl", &json!([{"id": "ethereum"}]), at(2_000))
            .await
            .unwrap();

        let record = store.get("coins/markets?vs_currency=brl").await.unwrap().unwrap();
        assert_eq!(record.payload, json!([{"id": "ethereum"}]));
        assert_eq!(record.updated_at, at(2_000));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(path).unwrap();
            store.upsert("k", &json!({"v": 1}), at(5_000)).await.unwrap();
        }

        let reopened = SqliteStore::open(path).unwrap();
        let record = reopened.get("k").await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"v": 1}));
        assert_eq!(record.updated_at, at(5_000));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_an_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO market_data_cache (cache_key, payload, updated_at) VALUES ('k', 'not json', 0)",
                [],
            )
            .unwrap();

        assert!(matches!(store.get("k").await, Err(StoreError::Serialization(_))));
    }
}
