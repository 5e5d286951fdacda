//! Shared State Abstractions
//!
//! Two optional stores the engine can be handed by its host:
//! a TTL-capable key-value store backing the snapshot cache, and a
//! sliding-window event log used to share rate-limit quotas between
//! processes.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// TTL-capable string key-value store
///
/// Any store with "set with expiry" semantics satisfies this contract:
/// Redis, memcached, a SQLite table with an expiry column, and so on.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
/// use std::time::Duration;
///
/// async fn remember(store: &dyn KeyValueStore, json: &str) -> Result<()> {
///     store.set("harmonizer:release:gtin:123", json, Duration::from_secs(60)).await
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value. Expired entries behave as missing.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check for a live value without transferring it
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Outcome of a sliding-window admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was recorded inside the window.
    Admitted,
    /// The window is full. `oldest_ms` is the timestamp of the oldest event
    /// still inside it; a slot frees once it ages past the window.
    Full { oldest_ms: i64 },
}

/// Sliding-window event log shared across processes
///
/// Modeled after a sorted set scored by timestamp. `try_admit` must be
/// atomic: prune events older than `now_ms - window_ms`, count what is left,
/// and record `member` only if the count is below `limit`.
#[async_trait]
pub trait WindowCounterStore: Send + Sync {
    async fn try_admit(
        &self,
        key: &str,
        member: &str,
        now_ms: i64,
        window_ms: i64,
        limit: u32,
    ) -> Result<Admission>;

    /// Drop every event recorded under `key`.
    async fn clear(&self, key: &str) -> Result<()>;
}
