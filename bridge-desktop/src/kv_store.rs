//! Key-value cache storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::KeyValueStore,
    time::{Clock, SystemClock},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS kv_entries (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed TTL store
///
/// Expiry is lazy: stale rows are ignored on read and removed when touched,
/// plus whenever [`purge_expired`](Self::purge_expired) runs.
pub struct SqliteKeyValueStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteKeyValueStore {
    /// Open (or create) a store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(BridgeError::Io)?;
        }

        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            db_path.to_string_lossy().replace('\\', "/")
        ))
        .map_err(|e| BridgeError::Storage(format!("Invalid database path: {}", e)))?
        .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        debug!(path = ?db_path, "Initialized key-value store");
        Self::with_pool(pool, Arc::new(SystemClock)).await
    }

    /// In-memory store (for testing). Pinned to one connection so every
    /// query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock)).await
    }

    pub async fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::with_pool(pool, clock).await
    }

    async fn with_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;

        Ok(Self { pool, clock })
    }

    /// Delete every expired row, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv_entries WHERE expires_at <= ?")
            .bind(self.clock.unix_timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to purge entries: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, expires_at FROM kv_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to get entry: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: i64 = row.get(1);
        if expires_at <= self.clock.unix_timestamp_millis() {
            debug!(key, "Entry expired");
            self.delete(key).await?;
            return Ok(None);
        }

        Ok(Some(row.get(0)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = self.clock.unix_timestamp_millis().saturating_add(ttl_ms);

        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::Storage(format!("Failed to set entry: {}", e)))?;

        debug!(key, ttl_secs = ttl.as_secs(), "Stored entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to delete entry: {}", e)))?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM kv_entries WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(self.clock.unix_timestamp_millis())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();

        store
            .set("release:gtin:1", r#"{"title":"x"}"#, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("release:gtin:1").await.unwrap(),
            Some(r#"{"title":"x"}"#.to_string())
        );
        assert!(store.exists("release:gtin:1").await.unwrap());

        store.delete("release:gtin:1").await.unwrap();
        assert_eq!(store.get("release:gtin:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_value() {
        let store = SqliteKeyValueStore::in_memory().await.unwrap();

        store.set("k", "one", Duration::from_secs(60)).await.unwrap();
        store.set("k", "two", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = SqliteKeyValueStore::in_memory_with_clock(clock.clone())
            .await
            .unwrap();

        store.set("short", "v", Duration::from_secs(10)).await.unwrap();
        store.set("long", "v", Duration::from_secs(3600)).await.unwrap();

        clock.advance(ChronoDuration::seconds(11));

        assert!(!store.exists("short").await.unwrap());
        assert_eq!(store.get("short").await.unwrap(), None);
        assert_eq!(store.get("long").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = SqliteKeyValueStore::in_memory_with_clock(clock.clone())
            .await
            .unwrap();

        store.set("a", "1", Duration::from_secs(1)).await.unwrap();
        store.set("b", "2", Duration::from_secs(1)).await.unwrap();
        store.set("c", "3", Duration::from_secs(100)).await.unwrap();

        clock.advance(ChronoDuration::seconds(5));
        assert_eq!(store.purge_expired().await.unwrap(), 2);
    }
}
