//! # Lookup Coordinator
//!
//! Entry point for every metadata request. A lookup:
//!
//! 1. validates its input (GTIN / ISRC checksums) before touching any provider
//! 2. answers from the snapshot cache unless `bypass_cache` is set
//! 3. selects target providers: explicit names, URL routing or the registry
//!    defaults
//! 4. queries them (release: concurrent fan-out + merge; track: priority
//!    order, first success wins)
//! 5. writes the result through to the cache and hands it to the
//!    persistence sink
//!
//! A failing provider never fails the request: its error is recorded in the
//! envelope's `errors` and the other providers' results are still used.
//! `data` is `None` only when no provider produced anything.
//!
//! There is no request deadline. A provider stuck behind its own rate
//! limiter or retry loop delays the whole fan-out.

use crate::cache::{CacheEntity, SnapshotCache};
use crate::error::{MetadataError, ProviderFailure, Result};
use crate::identifiers::{Gtin, Isrc};
use crate::merge::{EntityMerger, ReleaseMerger};
use crate::models::{
    HarmonizedArtist, HarmonizedRelease, HarmonizedTrack, LookupResult, SearchResult,
};
use crate::providers::MetadataProvider;
use crate::registry::{sort_by_priority, ProviderRegistry};
use async_trait::async_trait;
use bridge_traits::time::{Clock, SystemClock};
use futures::future::{join_all, BoxFuture};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Upper bound for search result counts per provider
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Host hook receiving every freshly resolved entity. Failures are logged
/// and never reach the caller.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist_release(&self, release: &HarmonizedRelease) -> anyhow::Result<()>;

    async fn persist_track(&self, track: &HarmonizedTrack) -> anyhow::Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl PersistenceSink for NoopPersistence {
    async fn persist_release(&self, _release: &HarmonizedRelease) -> anyhow::Result<()> {
        Ok(())
    }

    async fn persist_track(&self, _track: &HarmonizedTrack) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What identifies the release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseLookup {
    Gtin(String),
    Url(String),
}

impl fmt::Display for ReleaseLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseLookup::Gtin(gtin) => write!(f, "gtin:{gtin}"),
            ReleaseLookup::Url(url) => write!(f, "url:{url}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLookupRequest {
    pub lookup: ReleaseLookup,
    /// Explicit targets. `None` uses URL routing or the registry defaults.
    pub providers: Option<Vec<String>>,
    pub bypass_cache: bool,
}

impl ReleaseLookupRequest {
    pub fn by_gtin(gtin: impl Into<String>) -> Self {
        Self {
            lookup: ReleaseLookup::Gtin(gtin.into()),
            providers: None,
            bypass_cache: false,
        }
    }

    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            lookup: ReleaseLookup::Url(url.into()),
            providers: None,
            bypass_cache: false,
        }
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

enum ReleaseKey {
    Gtin(Gtin),
    Url(String),
}

/// Orchestrates cache, providers, merging and persistence
pub struct LookupCoordinator {
    registry: Arc<ProviderRegistry>,
    cache: SnapshotCache,
    persistence: Arc<dyn PersistenceSink>,
    release_merger: Arc<dyn EntityMerger<HarmonizedRelease>>,
    clock: Arc<dyn Clock>,
    enable_merging: bool,
}

impl LookupCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, cache: SnapshotCache) -> Self {
        Self {
            registry,
            cache,
            persistence: Arc::new(NoopPersistence),
            release_merger: Arc::new(ReleaseMerger::default()),
            clock: Arc::new(SystemClock),
            enable_merging: true,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_release_merger(mut self, merger: Arc<dyn EntityMerger<HarmonizedRelease>>) -> Self {
        self.release_merger = merger;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// When off, the highest-priority result is returned as-is.
    pub fn with_merging(mut self, enabled: bool) -> Self {
        self.enable_merging = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Resolves a release by GTIN or provider URL across providers.
    #[instrument(skip(self, request), fields(lookup = %request.lookup, bypass_cache = request.bypass_cache))]
    pub async fn lookup_release(
        &self,
        request: ReleaseLookupRequest,
    ) -> Result<LookupResult<HarmonizedRelease>> {
        let key = match &request.lookup {
            ReleaseLookup::Gtin(raw) => ReleaseKey::Gtin(Gtin::parse(raw)?),
            ReleaseLookup::Url(raw) => {
                let url = raw.trim();
                if url.is_empty() {
                    return Err(MetadataError::Validation("URL is empty".to_string()));
                }
                ReleaseKey::Url(url.to_string())
            }
        };
        let cache_key = match &key {
            ReleaseKey::Gtin(gtin) => self.cache.key(CacheEntity::Release, "gtin", gtin.as_str()),
            ReleaseKey::Url(url) => self.cache.key(CacheEntity::Release, "url", url),
        };

        if !request.bypass_cache {
            if let Some(release) = self.cache.get::<HarmonizedRelease>(&cache_key).await {
                return Ok(LookupResult::from_cache(release, self.clock.now()));
            }
        }

        let targets = match (&key, request.providers.as_deref()) {
            (_, Some(names)) => self.resolve_providers(names)?,
            (ReleaseKey::Url(url), None) => {
                let provider = self.registry.find_by_url(url).ok_or_else(|| {
                    MetadataError::Validation(format!("No enabled provider handles URL {url}"))
                })?;
                vec![provider]
            }
            (ReleaseKey::Gtin(_), None) => self.registry.get_defaults(),
        };
        debug!(
            providers = ?targets.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Release fan-out"
        );

        let outcomes = join_all(targets.iter().map(|provider| {
            let key = &key;
            async move {
                let outcome = match key {
                    ReleaseKey::Gtin(gtin) => provider.lookup_by_gtin(gtin).await,
                    ReleaseKey::Url(url) => provider.lookup_by_url(url).await,
                };
                (provider.name().to_string(), outcome)
            }
        }))
        .await;

        let mut releases = Vec::new();
        let mut errors = Vec::new();
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(Some(release)) => releases.push(release),
                Ok(None) => debug!(provider = %provider, "No release"),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Release lookup failed");
                    errors.push(ProviderFailure::new(provider, &e));
                }
            }
        }

        let data = if releases.len() > 1 && self.enable_merging {
            self.release_merger.merge(releases)
        } else {
            releases.into_iter().next()
        };

        if let Some(release) = &data {
            self.cache.set(CacheEntity::Release, &cache_key, release).await;
            if let Err(e) = self.persistence.persist_release(release).await {
                warn!(error = %e, "Failed to persist release");
            }
            info!(
                title = %release.title,
                sources = release.sources.len(),
                failures = errors.len(),
                "Release resolved"
            );
        }

        Ok(LookupResult::fresh(data, errors, self.clock.now()))
    }

    /// Resolves a track by ISRC. Providers are asked in priority order and
    /// the first hit wins.
    #[instrument(skip(self, providers), fields(isrc = %isrc))]
    pub async fn lookup_track(
        &self,
        isrc: &str,
        providers: Option<&[String]>,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedTrack>> {
        let isrc = Isrc::parse(isrc)?;
        let cache_key = self.cache.key(CacheEntity::Track, "isrc", isrc.as_str());

        if !bypass_cache {
            if let Some(track) = self.cache.get::<HarmonizedTrack>(&cache_key).await {
                return Ok(LookupResult::from_cache(track, self.clock.now()));
            }
        }

        let targets = match providers {
            Some(names) => self.resolve_providers(names)?,
            None => self.registry.get_defaults(),
        };

        let mut errors = Vec::new();
        let mut data = None;
        for provider in &targets {
            match provider.lookup_by_isrc(&isrc).await {
                Ok(Some(track)) => {
                    debug!(provider = provider.name(), "Track found");
                    data = Some(track);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Track lookup failed");
                    errors.push(ProviderFailure::new(provider.name(), &e));
                }
            }
        }

        if let Some(track) = &data {
            self.cache.set(CacheEntity::Track, &cache_key, track).await;
            if let Err(e) = self.persistence.persist_track(track).await {
                warn!(error = %e, "Failed to persist track");
            }
        }

        Ok(LookupResult::fresh(data, errors, self.clock.now()))
    }

    /// Single-provider artist lookup by provider-native id.
    #[instrument(skip(self))]
    pub async fn lookup_artist(
        &self,
        provider: &str,
        id: &str,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedArtist>> {
        let target = self
            .registry
            .get(provider)
            .ok_or_else(|| MetadataError::ProviderNotFound(provider.to_string()))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(MetadataError::Validation("Artist id is empty".to_string()));
        }

        let cache_key = self.cache.key(CacheEntity::Artist, target.name(), id);
        if !bypass_cache {
            if let Some(artist) = self.cache.get::<HarmonizedArtist>(&cache_key).await {
                return Ok(LookupResult::from_cache(artist, self.clock.now()));
            }
        }

        let mut errors = Vec::new();
        let data = match target.lookup_artist(id).await {
            Ok(artist) => artist,
            Err(e) => {
                warn!(error = %e, "Artist lookup failed");
                errors.push(ProviderFailure::new(target.name(), &e));
                None
            }
        };

        if let Some(artist) = &data {
            self.cache.set(CacheEntity::Artist, &cache_key, artist).await;
        }

        Ok(LookupResult::fresh(data, errors, self.clock.now()))
    }

    #[instrument(skip(self, providers))]
    pub async fn search_releases(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedRelease>> {
        self.search(query, providers, limit, |provider, query, limit| {
            Box::pin(async move { provider.search_releases(&query, limit).await })
        })
        .await
    }

    #[instrument(skip(self, providers))]
    pub async fn search_tracks(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedTrack>> {
        self.search(query, providers, limit, |provider, query, limit| {
            Box::pin(async move { provider.search_tracks(&query, limit).await })
        })
        .await
    }

    #[instrument(skip(self, providers))]
    pub async fn search_artists(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedArtist>> {
        self.search(query, providers, limit, |provider, query, limit| {
            Box::pin(async move { provider.search_artists(&query, limit).await })
        })
        .await
    }

    /// Concurrent fan-out; per-provider lists are concatenated in target
    /// order without deduplication.
    async fn search<T, F>(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
        call: F,
    ) -> Result<SearchResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn MetadataProvider>, String, usize) -> BoxFuture<'static, Result<Vec<T>>>,
    {
        let query = query.trim();
        if query.is_empty() {
            return Err(MetadataError::Validation("Search query is empty".to_string()));
        }
        let limit = limit.clamp(1, MAX_SEARCH_LIMIT);

        let targets = match providers {
            Some(names) => self.resolve_providers(names)?,
            None => self.registry.get_defaults(),
        };

        let outcomes = join_all(targets.iter().map(|provider| {
            let name = provider.name().to_string();
            let pending = call(Arc::clone(provider), query.to_string(), limit);
            async move { (name, pending.await) }
        }))
        .await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(found) => results.extend(found),
                Err(e) => {
                    warn!(provider = %provider, error = %e, "Search failed");
                    errors.push(ProviderFailure::new(provider, &e));
                }
            }
        }

        Ok(SearchResult {
            results,
            timestamp: self.clock.now(),
            errors,
        })
    }

    /// Explicitly named providers in priority order. Unknown or disabled
    /// names fail the request.
    fn resolve_providers(&self, names: &[String]) -> Result<Vec<Arc<dyn MetadataProvider>>> {
        let mut providers = Vec::with_capacity(names.len());
        for name in names {
            let provider = self
                .registry
                .get(name)
                .ok_or_else(|| MetadataError::ProviderNotFound(name.clone()))?;
            if !providers
                .iter()
                .any(|p: &Arc<dyn MetadataProvider>| p.name() == provider.name())
            {
                providers.push(provider);
            }
        }
        sort_by_priority(&mut providers);
        Ok(providers)
    }
}
