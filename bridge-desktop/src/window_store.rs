//! Sliding-window event log using SQLite
//!
//! Several processes pointing at the same database file share one quota per
//! key. Admission runs inside a `BEGIN IMMEDIATE` transaction, which takes the
//! database write lock up front so prune, count and insert are atomic.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{Admission, WindowCounterStore},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS window_events (
        key TEXT NOT NULL,
        member TEXT NOT NULL,
        at_ms INTEGER NOT NULL,
        PRIMARY KEY (key, member)
    )
"#;

pub struct SqliteWindowStore {
    pool: SqlitePool,
}

impl SqliteWindowStore {
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
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        debug!(path = ?db_path, "Initialized window store");
        Self::with_pool(pool).await
    }

    /// In-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to connect to DB: {}", e)))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to create table: {}", e)))?;

        Ok(Self { pool })
    }

    async fn admit_locked(
        conn: &mut SqliteConnection,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<Admission> {
        sqlx::query("DELETE FROM window_events WHERE key = ? AND at_ms <= ?")
            .bind(key)
            .bind(now_ms - window_ms)
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to prune window: {}", e)))?;

        let row = sqlx::query("SELECT COUNT(*), MIN(at_ms) FROM window_events WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to count window: {}", e)))?;

        let count: i64 = row.get(0);
        let oldest: Option<i64> = row.get(1);

        if count >= i64::from(limit) {
            return Ok(Admission::Full {
                oldest_ms: oldest.unwrap_or(now_ms),
            });
        }

        sqlx::query("INSERT OR REPLACE INTO window_events (key, member, at_ms) VALUES (?, ?, ?)")
            .bind(key)
            .bind(member)
            .bind(now_ms)
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to record event: {}", e)))?;

        Ok(Admission::Admitted)
    }
}

#[async_trait]
impl WindowCounterStore for SqliteWindowStore {
    async fn try_admit(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<Admission> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to acquire connection: {}", e)))?;

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to begin transaction: {}", e)))?;

        match Self::admit_locked(&mut conn, key, member, now_ms, window_ms, limit).await {
            Ok(admission) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| BridgeError::Storage(format!("Failed to commit: {}", e)))?;
                Ok(admission)
            }
            Err(err) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(error = %rollback, "Failed to roll back window transaction");
                }
                Err(err)
            }
        }
    }

    async fn clear(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM window_events WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BridgeError::Storage(format!("Failed to clear window: {}", e)))?;

        Ok(())
    }
}
