//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, cache store,
//! shared rate-limit store, persistence) into the harmonization engine.
//! Desktop and server hosts typically enable the `desktop-shims` feature
//! (which depends on `bridge-desktop`) and call [`bootstrap_desktop`].

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    storage::{KeyValueStore, WindowCounterStore},
    time::{Clock, SystemClock},
};
use core_metadata::{
    CacheBackend, HarmonizedArtist, HarmonizedRelease, HarmonizedTrack, LookupCoordinator,
    LookupResult, MetadataProvider, NoopPersistence, PersistenceSink, ProviderConstructors,
    ProviderContext, ProviderInfo, ProviderRegistry, RateLimitBackend, ReleaseLookupRequest,
    RetryPolicy, SearchResult, SnapshotCache,
};
use core_runtime::config::{HarmonizerConfig, ProviderSettings};
use tracing::info;

#[cfg(feature = "desktop-shims")]
use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore, SqliteWindowStore};

/// Aggregated handle to the bridge dependencies the engine uses.
///
/// Only the HTTP client is mandatory. Without a cache store every lookup
/// goes to the providers; without a window store rate limits are enforced
/// per process.
pub struct HarmonizerDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub cache_store: Option<Arc<dyn KeyValueStore>>,
    pub window_store: Option<Arc<dyn WindowCounterStore>>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub clock: Arc<dyn Clock>,
    pub constructors: ProviderConstructors,
}

impl HarmonizerDependencies {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            cache_store: None,
            window_store: None,
            persistence: Arc::new(NoopPersistence),
            clock: Arc::new(SystemClock),
            constructors: ProviderConstructors::builtin(),
        }
    }

    pub fn with_cache_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    pub fn with_window_store(mut self, store: Arc<dyn WindowCounterStore>) -> Self {
        self.window_store = Some(store);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make an additional provider available to the configuration.
    pub fn with_provider_constructor<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ProviderContext) -> core_metadata::Result<Arc<dyn MetadataProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.register(name, constructor);
        self
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct HarmonizerService {
    config: Arc<HarmonizerConfig>,
    coordinator: Arc<LookupCoordinator>,
}

impl HarmonizerService {
    /// Validate `config`, instantiate the enabled providers and assemble the
    /// coordinator.
    pub fn new(config: HarmonizerConfig, deps: HarmonizerDependencies) -> Result<Self> {
        config.validate()?;

        let rate_limit = match deps.window_store {
            Some(store) => RateLimitBackend::Shared(store),
            None => RateLimitBackend::Local,
        };
        let base = ProviderContext::new(deps.http_client, ProviderSettings::default())
            .with_clock(Arc::clone(&deps.clock))
            .with_retry(RetryPolicy::from(&config.retry))
            .with_rate_limit_backend(rate_limit)
            .with_user_agent(config.user_agent.clone())
            .with_timeout(config.http_timeout());

        let registry = Arc::new(ProviderRegistry::from_config(
            &config,
            &base,
            &deps.constructors,
        )?);

        let cache_backend = match deps.cache_store {
            Some(store) => CacheBackend::Store(store),
            None => CacheBackend::Absent,
        };
        let cache = SnapshotCache::new(cache_backend, &config.cache);

        info!(
            providers = registry.get_enabled().len(),
            cache = cache.is_enabled(),
            shared_rate_limits = matches!(base.rate_limit, RateLimitBackend::Shared(_)),
            "Harmonizer service ready"
        );

        let coordinator = LookupCoordinator::new(registry, cache)
            .with_persistence(deps.persistence)
            .with_clock(deps.clock)
            .with_merging(config.enable_merging);

        Ok(Self {
            config: Arc::new(config),
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn config(&self) -> &HarmonizerConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<LookupCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Release by barcode across `providers` (default targets when `None`).
    pub async fn lookup_by_gtin(
        &self,
        gtin: &str,
        providers: Option<Vec<String>>,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedRelease>> {
        let mut request = ReleaseLookupRequest::by_gtin(gtin).bypass_cache(bypass_cache);
        request.providers = providers;
        Ok(self.coordinator.lookup_release(request).await?)
    }

    /// Release by provider URL, routed to the provider that understands it.
    pub async fn lookup_by_url(
        &self,
        url: &str,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedRelease>> {
        let request = ReleaseLookupRequest::by_url(url).bypass_cache(bypass_cache);
        Ok(self.coordinator.lookup_release(request).await?)
    }

    pub async fn lookup_by_isrc(
        &self,
        isrc: &str,
        providers: Option<&[String]>,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedTrack>> {
        Ok(self
            .coordinator
            .lookup_track(isrc, providers, bypass_cache)
            .await?)
    }

    pub async fn lookup_artist(
        &self,
        provider: &str,
        id: &str,
        bypass_cache: bool,
    ) -> Result<LookupResult<HarmonizedArtist>> {
        Ok(self
            .coordinator
            .lookup_artist(provider, id, bypass_cache)
            .await?)
    }

    /// Release search
    pub async fn search(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedRelease>> {
        Ok(self
            .coordinator
            .search_releases(query, providers, limit)
            .await?)
    }

    pub async fn search_tracks(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedTrack>> {
        Ok(self
            .coordinator
            .search_tracks(query, providers, limit)
            .await?)
    }

    pub async fn search_artists(
        &self,
        query: &str,
        providers: Option<&[String]>,
        limit: usize,
    ) -> Result<SearchResult<HarmonizedArtist>> {
        Ok(self
            .coordinator
            .search_artists(query, providers, limit)
            .await?)
    }

    /// Enabled provider by name
    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn MetadataProvider>> {
        self.coordinator.registry().get(name)
    }

    /// Enabled providers, highest priority first
    pub fn get_enabled_providers(&self) -> Vec<ProviderInfo> {
        self.coordinator
            .registry()
            .get_by_priority()
            .iter()
            .map(|provider| ProviderInfo {
                name: provider.name().to_string(),
                display_name: provider.display_name().to_string(),
                priority: provider.priority(),
                enabled: true,
            })
            .collect()
    }
}

/// Convenience bootstrapper for desktop and server hosts.
///
/// Uses `reqwest` for HTTP and opens the SQLite stores named in
/// `config.storage`; unset paths leave the corresponding store out.
///
/// ```no_run
/// # #[cfg(feature = "desktop-shims")]
/// # async fn example() -> core_service::Result<()> {
/// use core_runtime::config::HarmonizerConfig;
/// use core_service::bootstrap_desktop;
///
/// let service = bootstrap_desktop(HarmonizerConfig::from_env()?).await?;
/// let result = service.lookup_by_gtin("0724352771752", None, false).await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: HarmonizerConfig) -> Result<HarmonizerService> {
    let http = ReqwestHttpClient::with_timeout(config.http_timeout())?;
    let mut deps = HarmonizerDependencies::new(Arc::new(http));

    if let Some(path) = &config.storage.cache_db_path {
        deps = deps.with_cache_store(Arc::new(SqliteKeyValueStore::new(path.clone()).await?));
    }
    if let Some(path) = &config.storage.rate_limit_db_path {
        deps = deps.with_window_store(Arc::new(SqliteWindowStore::new(path.clone()).await?));
    }

    HarmonizerService::new(config, deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use core_metadata::identifiers::{Gtin, Isrc};
    use core_metadata::{EntityType, MetadataError, ParsedUrl, ProviderSource};
    use core_runtime::config::DISCOGS;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    mock! {
        Sink {}

        #[async_trait]
        impl PersistenceSink for Sink {
            async fn persist_release(&self, release: &HarmonizedRelease) -> anyhow::Result<()>;
            async fn persist_track(&self, track: &HarmonizedTrack) -> anyhow::Result<()>;
        }
    }

    struct LocalCatalog {
        priority: i32,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MetadataProvider for LocalCatalog {
        fn name(&self) -> &str {
            "local"
        }
        fn display_name(&self) -> &str {
            "Local Catalog"
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn parse_url(&self, url: &str) -> Option<ParsedUrl> {
            url.strip_prefix("local://release/")
                .map(|id| ParsedUrl::new(EntityType::Release, id))
        }
        async fn lookup_by_gtin(
            &self,
            gtin: &Gtin,
        ) -> core_metadata::Result<Option<HarmonizedRelease>> {
            self.lookup_release_by_id(gtin.as_str()).await
        }
        async fn lookup_release_by_id(
            &self,
            id: &str,
        ) -> core_metadata::Result<Option<HarmonizedRelease>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(HarmonizedRelease {
                title: "OK Computer".to_string(),
                sources: vec![ProviderSource::new("local", id, None, SystemClock.now())],
                confidence: 1.0,
                ..Default::default()
            }))
        }
        async fn lookup_by_isrc(
            &self,
            _isrc: &Isrc,
        ) -> core_metadata::Result<Option<HarmonizedTrack>> {
            Ok(None)
        }
        async fn lookup_artist(
            &self,
            _id: &str,
        ) -> core_metadata::Result<Option<HarmonizedArtist>> {
            Err(MetadataError::Provider {
                provider: "local".to_string(),
                message: "no artist index".to_string(),
            })
        }
        async fn search_releases(
            &self,
            _query: &str,
            _limit: usize,
        ) -> core_metadata::Result<Vec<HarmonizedRelease>> {
            Ok(Vec::new())
        }
        async fn search_tracks(
            &self,
            _query: &str,
            _limit: usize,
        ) -> core_metadata::Result<Vec<HarmonizedTrack>> {
            Ok(Vec::new())
        }
        async fn search_artists(
            &self,
            _query: &str,
            _limit: usize,
        ) -> core_metadata::Result<Vec<HarmonizedArtist>> {
            Ok(Vec::new())
        }
    }

    fn offline_http() -> Arc<dyn HttpClient> {
        let mut http = MockHttp::new();
        http.expect_execute().never();
        Arc::new(http)
    }

    fn config_with_local() -> HarmonizerConfig {
        HarmonizerConfig::builder()
            .musicbrainz("HarmonizerTests/1.0 ( tests@example.org )")
            .discogs("token")
            .provider("local", ProviderSettings::enabled().with_priority(500))
            .default_providers(["local"])
            .build()
            .unwrap()
    }

    fn deps(calls: Arc<AtomicUsize>) -> HarmonizerDependencies {
        HarmonizerDependencies::new(offline_http()).with_provider_constructor(
            "local",
            move |ctx| {
                Ok(Arc::new(LocalCatalog {
                    priority: ctx.priority_or(0),
                    calls: Arc::clone(&calls),
                }) as Arc<dyn MetadataProvider>)
            },
        )
    }

    #[test]
    fn test_enabled_providers_in_priority_order() {
        let service =
            HarmonizerService::new(config_with_local(), deps(Arc::default())).unwrap();

        let names: Vec<String> = service
            .get_enabled_providers()
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["local", "musicbrainz", "discogs"]);
        assert_eq!(service.get_provider(DISCOGS).unwrap().display_name(), "Discogs");
        assert!(service.get_provider("tidal").is_none());
    }

    #[test]
    fn test_unknown_enabled_provider_fails_initialization() {
        let result = HarmonizerService::new(
            config_with_local(),
            HarmonizerDependencies::new(offline_http()),
        );

        assert!(matches!(
            result,
            Err(CoreError::Metadata(MetadataError::Config(_)))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = HarmonizerConfig::default();
        config.http_timeout_ms = 0;

        let result = HarmonizerService::new(config, HarmonizerDependencies::new(offline_http()));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_lookups_use_default_providers_and_persist() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sink = MockSink::new();
        sink.expect_persist_release().times(2).returning(|_| Ok(()));

        let service = HarmonizerService::new(
            config_with_local(),
            deps(Arc::clone(&calls)).with_persistence(Arc::new(sink)),
        )
        .unwrap();

        let by_gtin = service
            .lookup_by_gtin("0724352771752", None, false)
            .await
            .unwrap();
        assert_eq!(by_gtin.data.unwrap().title, "OK Computer");

        let by_url = service
            .lookup_by_url("local://release/42", false)
            .await
            .unwrap();
        assert_eq!(by_url.sources[0].id, "42");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failures_are_reported_in_envelope() {
        let service =
            HarmonizerService::new(config_with_local(), deps(Arc::default())).unwrap();

        let result = service.lookup_artist("local", "rh", false).await.unwrap();

        assert!(result.data.is_none());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("no artist index"));
    }

    #[tokio::test]
    async fn test_invalid_isrc_surfaces_as_error() {
        let service =
            HarmonizerService::new(config_with_local(), deps(Arc::default())).unwrap();

        let result = service.lookup_by_isrc("not-an-isrc", None, false).await;
        assert!(matches!(
            result,
            Err(CoreError::Metadata(MetadataError::Validation(_)))
        ));
    }
}
