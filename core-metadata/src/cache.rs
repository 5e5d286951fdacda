//! Snapshot cache
//!
//! Read-through JSON snapshots of lookup results in a host
//! [`KeyValueStore`]. The cache only ever saves work: an absent backend, a
//! store error or an unreadable entry all behave as a miss, and failed
//! writes are dropped with a warning.

use bridge_traits::storage::KeyValueStore;
use core_runtime::config::CacheSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where snapshots live
#[derive(Clone, Default)]
pub enum CacheBackend {
    /// No caching: every read misses, every write is a no-op
    #[default]
    Absent,
    Store(Arc<dyn KeyValueStore>),
}

impl fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackend::Absent => f.write_str("Absent"),
            CacheBackend::Store(_) => f.write_str("Store"),
        }
    }
}

/// Entity class of a snapshot; selects the TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEntity {
    Release,
    Track,
    Artist,
}

impl CacheEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEntity::Release => "release",
            CacheEntity::Track => "track",
            CacheEntity::Artist => "artist",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    backend: CacheBackend,
    prefix: String,
    release_ttl: Duration,
    track_ttl: Duration,
    artist_ttl: Duration,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(CacheBackend::Absent, &CacheSettings::default())
    }
}

impl SnapshotCache {
    /// `settings.enabled = false` forces the absent backend.
    pub fn new(backend: CacheBackend, settings: &CacheSettings) -> Self {
        let backend = if settings.enabled {
            backend
        } else {
            CacheBackend::Absent
        };

        Self {
            backend,
            prefix: settings.key_prefix.clone(),
            release_ttl: Duration::from_secs(settings.release_ttl_secs),
            track_ttl: Duration::from_secs(settings.track_ttl_secs),
            artist_ttl: Duration::from_secs(settings.artist_ttl_secs),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.backend, CacheBackend::Store(_))
    }

    /// `{prefix}:{entity}:{lookup}:{value}` with `value` trimmed and
    /// lower-cased
    pub fn key(&self, entity: CacheEntity, lookup: &str, value: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            self.prefix,
            entity.as_str(),
            lookup,
            value.trim().to_lowercase()
        )
    }

    pub fn ttl(&self, entity: CacheEntity) -> Duration {
        match entity {
            CacheEntity::Release => self.release_ttl,
            CacheEntity::Track => self.track_ttl,
            CacheEntity::Artist => self.artist_ttl,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let CacheBackend::Store(store) = &self.backend else {
            return None;
        };

        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached snapshot is unreadable, treating as miss");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, entity: CacheEntity, key: &str, value: &T) {
        let CacheBackend::Store(store) = &self.backend else {
            return;
        };

        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize snapshot");
                return;
            }
        };

        if let Err(e) = store.set(key, &json, self.ttl(entity)).await {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        if let CacheBackend::Store(store) = &self.backend {
            if let Err(e) = store.delete(key).await {
                warn!(key, error = %e, "Cache delete failed");
            }
        }
    }
}
