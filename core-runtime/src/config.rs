//! # Harmonizer Configuration
//!
//! Settings for the metadata harmonization engine: which providers are
//! enabled and with which credentials, per-provider rate limits, retry and
//! cache tuning, and where the desktop stores live.
//!
//! Host bridges (HTTP client, stores, persistence callbacks) are not part of
//! this struct; they are injected separately when the service is built so the
//! configuration stays plain data that can be loaded from JSON or the
//! environment.
//!
//! ## Usage
//!
//! ### Builder
//!
//! ```ignore
//! use core_runtime::config::HarmonizerConfig;
//!
//! let config = HarmonizerConfig::builder()
//!     .musicbrainz("MyApp/1.0 (ops@example.com)")
//!     .tidal("client-id", "client-secret")
//!     .default_providers(["musicbrainz", "tidal"])
//!     .build()?;
//! ```
//!
//! ### Environment
//!
//! ```ignore
//! // MUSICBRAINZ_USER_AGENT, TIDAL_CLIENT_ID, TIDAL_CLIENT_SECRET, DISCOGS_TOKEN
//! let config = HarmonizerConfig::from_env()?;
//! ```
//!
//! ## Error Handling
//!
//! `validate()` (called by `build`, `from_env` and `from_json`) fails fast
//! with a message naming the offending provider or setting:
//!
//! ```ignore
//! let err = HarmonizerConfig::builder()
//!     .provider("tidal", ProviderSettings::enabled())
//!     .build()
//!     .unwrap_err();
//! assert!(err.to_string().contains("TIDAL_CLIENT_ID"));
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const MUSICBRAINZ: &str = "musicbrainz";
pub const TIDAL: &str = "tidal";
pub const DISCOGS: &str = "discogs";

pub const DEFAULT_USER_AGENT: &str = concat!(
    "metadata-harmonizer/",
    env!("CARGO_PKG_VERSION"),
    " ( https://github.com/metadata-harmonizer )"
);

/// Longest rate-limit window accepted by `validate`
const MAX_WINDOW_MS: u64 = 3_600_000;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HarmonizerConfig {
    /// Provider name → settings. Providers missing from the map are disabled.
    pub providers: BTreeMap<String, ProviderSettings>,

    /// Providers queried when a request names none. Empty means every
    /// enabled provider, in priority order.
    pub default_providers: Vec<String>,

    /// Merge multi-provider release results. When off, the
    /// highest-priority result is returned as-is.
    pub enable_merging: bool,

    pub retry: RetrySettings,

    pub cache: CacheSettings,

    pub storage: StorageSettings,

    /// Per-request HTTP timeout
    pub http_timeout_ms: u64,

    /// Fallback User-Agent for providers without their own
    pub user_agent: String,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(MUSICBRAINZ.to_string(), ProviderSettings::enabled());

        Self {
            providers,
            default_providers: Vec::new(),
            enable_merging: true,
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
            storage: StorageSettings::default(),
            http_timeout_ms: 30_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Settings for one provider
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub enabled: bool,

    /// Overrides the provider's built-in priority (higher is preferred)
    pub priority: Option<i32>,

    /// Overrides the provider's API base URL (mirrors, test servers)
    pub base_url: Option<String>,

    pub credentials: Credentials,

    /// Storefront country for providers with regional catalogs
    pub country_code: Option<String>,

    /// Overrides the provider's built-in quota
    pub rate_limit: Option<RateLimitSettings>,
}

impl ProviderSettings {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_country_code(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = Some(country_code.into());
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window_ms: u64) -> Self {
        self.rate_limit = Some(RateLimitSettings {
            max_requests,
            window_ms,
        });
        self
    }
}

/// Provider credentials. Which fields matter depends on the provider's
/// auth strategy.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Static personal token
    pub token: Option<String>,
    pub user_agent: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |name: &str, value: &Option<String>| {
            value.as_deref().map(|v| redact_if_sensitive(name, v))
        };
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted("client_secret", &self.client_secret))
            .field("token", &redacted("token", &self.token))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Request quota: at most `max_requests` per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Exponential backoff for transient provider failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Additional attempts after the first
    pub retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: 3,
            min_delay_ms: 500,
            max_delay_ms: 10_000,
            factor: 2.0,
            jitter: true,
        }
    }
}

/// Snapshot cache tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub key_prefix: String,
    pub release_ttl_secs: u64,
    pub track_ttl_secs: u64,
    pub artist_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "harmonizer".to_string(),
            release_ttl_secs: 24 * 60 * 60,
            track_ttl_secs: 24 * 60 * 60,
            artist_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// On-disk locations for the desktop stores. Unset paths leave the
/// corresponding store absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite file backing the snapshot cache
    pub cache_db_path: Option<PathBuf>,
    /// SQLite file shared by processes for distributed rate limiting
    pub rate_limit_db_path: Option<PathBuf>,
}

impl HarmonizerConfig {
    pub fn builder() -> HarmonizerConfigBuilder {
        HarmonizerConfigBuilder::default()
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from process environment variables. See
    /// [`from_env_vars`](Self::from_env_vars).
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// - `MUSICBRAINZ_USER_AGENT`: MusicBrainz User-Agent (MusicBrainz is
    ///   always enabled)
    /// - `TIDAL_CLIENT_ID` + `TIDAL_CLIENT_SECRET`: enables Tidal
    /// - `TIDAL_COUNTRY_CODE`: Tidal storefront (default `US`)
    /// - `DISCOGS_TOKEN`: enables Discogs
    /// - `HARMONIZER_DEFAULT_PROVIDERS`: comma-separated default targets
    /// - `HARMONIZER_CACHE_DB` / `HARMONIZER_RATE_LIMIT_DB`: store paths
    pub fn from_env_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        let mut musicbrainz = ProviderSettings::enabled();
        musicbrainz.credentials.user_agent = var("MUSICBRAINZ_USER_AGENT");
        builder = builder.provider(MUSICBRAINZ, musicbrainz);

        match (var("TIDAL_CLIENT_ID"), var("TIDAL_CLIENT_SECRET")) {
            (Some(id), Some(secret)) => {
                let mut tidal = ProviderSettings::enabled().with_credentials(Credentials {
                    client_id: Some(id),
                    client_secret: Some(secret),
                    ..Credentials::default()
                });
                tidal.country_code = var("TIDAL_COUNTRY_CODE");
                builder = builder.provider(TIDAL, tidal);
            }
            (None, None) => {}
            _ => {
                return Err(Error::Config(
                    "TIDAL_CLIENT_ID and TIDAL_CLIENT_SECRET must be set together".to_string(),
                ))
            }
        }

        if let Some(token) = var("DISCOGS_TOKEN") {
            builder = builder.discogs(token);
        }

        if let Some(defaults) = var("HARMONIZER_DEFAULT_PROVIDERS") {
            builder = builder.default_providers(
                defaults
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            );
        }

        let storage = StorageSettings {
            cache_db_path: var("HARMONIZER_CACHE_DB").map(PathBuf::from),
            rate_limit_db_path: var("HARMONIZER_RATE_LIMIT_DB").map(PathBuf::from),
        };

        builder.storage(storage).build()
    }

    /// Names of enabled providers, alphabetical
    pub fn enabled_providers(&self) -> Vec<&str> {
        self.providers
            .iter()
            .filter(|(_, settings)| settings.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Checks cross-field consistency.
    ///
    /// - at least one provider is enabled
    /// - enabled providers carry the credentials their auth strategy needs
    /// - default providers are configured and enabled
    /// - rate limits, retry and cache values are in range
    pub fn validate(&self) -> Result<()> {
        if self.enabled_providers().is_empty() {
            return Err(Error::Config(
                "No metadata provider is enabled. Enable at least one provider \
                 (musicbrainz needs no credentials)."
                    .to_string(),
            ));
        }

        for (name, settings) in &self.providers {
            if settings.enabled {
                validate_provider(name, settings)?;
            }
        }

        for name in &self.default_providers {
            match self.providers.get(name) {
                Some(settings) if settings.enabled => {}
                Some(_) => {
                    return Err(Error::Config(format!(
                        "Default provider '{}' is disabled. Enable it or remove it from defaultProviders.",
                        name
                    )))
                }
                None => {
                    return Err(Error::Config(format!(
                        "Default provider '{}' is not configured",
                        name
                    )))
                }
            }
        }

        self.retry.validate()?;
        self.cache.validate()?;

        if self.http_timeout_ms == 0 {
            return Err(Error::Config(
                "HTTP timeout must be greater than 0ms".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn validate_provider(name: &str, settings: &ProviderSettings) -> Result<()> {
    let creds = &settings.credentials;

    match name {
        MUSICBRAINZ => {
            if let Some(ua) = &creds.user_agent {
                if !ua.contains('/') || !ua.contains('(') || !ua.contains(')') {
                    return Err(Error::Config(
                        "MusicBrainz user agent must follow format: 'AppName/Version (Contact)'"
                            .to_string(),
                    ));
                }
            }
        }
        TIDAL => {
            if creds.client_id.is_none() || creds.client_secret.is_none() {
                return Err(Error::Config(
                    "Tidal is enabled but credentials are missing. Set TIDAL_CLIENT_ID and \
                     TIDAL_CLIENT_SECRET or disable the provider."
                        .to_string(),
                ));
            }
        }
        DISCOGS => {
            if creds.token.is_none() {
                return Err(Error::Config(
                    "Discogs is enabled but no personal token is set. Set DISCOGS_TOKEN or \
                     disable the provider."
                        .to_string(),
                ));
            }
        }
        _ => {}
    }

    if let Some(base_url) = &settings.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Provider '{}' base URL must start with http:// or https://",
                name
            )));
        }
    }

    if let Some(limit) = settings.rate_limit {
        if limit.max_requests == 0 {
            return Err(Error::Config(format!(
                "Provider '{}' rate limit must allow at least 1 request",
                name
            )));
        }
        if limit.window_ms == 0 || limit.window_ms > MAX_WINDOW_MS {
            return Err(Error::Config(format!(
                "Provider '{}' rate limit window must be between 1ms and {}ms",
                name, MAX_WINDOW_MS
            )));
        }
    }

    Ok(())
}

impl RetrySettings {
    pub fn validate(&self) -> Result<()> {
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err(Error::Config(
                "Retry factor must be a finite number >= 1.0".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "Retry minDelayMs ({}) exceeds maxDelayMs ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.trim().is_empty() {
            return Err(Error::Config("Cache key prefix cannot be empty".to_string()));
        }
        if self.release_ttl_secs == 0 || self.track_ttl_secs == 0 || self.artist_ttl_secs == 0 {
            return Err(Error::Config(
                "Cache TTLs must be greater than 0 seconds".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`HarmonizerConfig`]
///
/// Starts from the defaults (MusicBrainz enabled, everything else off).
#[derive(Debug, Clone, Default)]
pub struct HarmonizerConfigBuilder {
    config: HarmonizerConfig,
}

impl HarmonizerConfigBuilder {
    /// Insert or replace a provider's settings.
    pub fn provider(mut self, name: impl Into<String>, settings: ProviderSettings) -> Self {
        self.config.providers.insert(name.into(), settings);
        self
    }

    pub fn musicbrainz(self, user_agent: impl Into<String>) -> Self {
        let mut settings = ProviderSettings::enabled();
        settings.credentials.user_agent = Some(user_agent.into());
        self.provider(MUSICBRAINZ, settings)
    }

    pub fn tidal(self, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        self.provider(
            TIDAL,
            ProviderSettings::enabled().with_credentials(Credentials {
                client_id: Some(client_id.into()),
                client_secret: Some(client_secret.into()),
                ..Credentials::default()
            }),
        )
    }

    pub fn discogs(self, token: impl Into<String>) -> Self {
        self.provider(
            DISCOGS,
            ProviderSettings::enabled().with_credentials(Credentials {
                token: Some(token.into()),
                ..Credentials::default()
            }),
        )
    }

    pub fn disable(mut self, name: &str) -> Self {
        if let Some(settings) = self.config.providers.get_mut(name) {
            settings.enabled = false;
        }
        self
    }

    pub fn default_providers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.default_providers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn enable_merging(mut self, enabled: bool) -> Self {
        self.config.enable_merging = enabled;
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn cache(mut self, cache: CacheSettings) -> Self {
        self.config.cache = cache;
        self
    }

    pub fn storage(mut self, storage: StorageSettings) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<HarmonizerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = HarmonizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_providers(), vec!["musicbrainz"]);
        assert_eq!(config.cache.release_ttl_secs, 86_400);
        assert_eq!(config.cache.artist_ttl_secs, 604_800);
    }

    #[test]
    fn test_builder_enables_all_three_providers() {
        let config = HarmonizerConfig::builder()
            .musicbrainz("MyApp/1.0 (ops@example.com)")
            .tidal("id", "secret")
            .discogs("token")
            .default_providers(["musicbrainz", "tidal"])
            .build()
            .unwrap();

        assert_eq!(
            config.enabled_providers(),
            vec!["discogs", "musicbrainz", "tidal"]
        );
        assert_eq!(config.default_providers, vec!["musicbrainz", "tidal"]);
    }

    #[test]
    fn test_validate_rejects_tidal_without_credentials() {
        let err = HarmonizerConfig::builder()
            .provider(TIDAL, ProviderSettings::enabled())
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("TIDAL_CLIENT_ID"));
    }

    #[test]
    fn test_validate_rejects_discogs_without_token() {
        let err = HarmonizerConfig::builder()
            .provider(DISCOGS, ProviderSettings::enabled())
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("DISCOGS_TOKEN"));
    }

    #[test]
    fn test_validate_rejects_malformed_musicbrainz_user_agent() {
        let err = HarmonizerConfig::builder()
            .musicbrainz("just-a-name")
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("AppName/Version"));
    }

    #[test]
    fn test_validate_rejects_no_enabled_providers() {
        let err = HarmonizerConfig::builder()
            .disable(MUSICBRAINZ)
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("No metadata provider is enabled"));
    }

    #[test]
    fn test_validate_rejects_unknown_default_provider() {
        let err = HarmonizerConfig::builder()
            .default_providers(["spotify"])
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("'spotify' is not configured"));
    }

    #[test]
    fn test_validate_rejects_zero_rate_limit() {
        let err = HarmonizerConfig::builder()
            .provider(MUSICBRAINZ, ProviderSettings::enabled().with_rate_limit(0, 1000))
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("at least 1 request"));
    }

    #[test]
    fn test_validate_rejects_inverted_retry_delays() {
        let err = HarmonizerConfig::builder()
            .retry(RetrySettings {
                min_delay_ms: 5_000,
                max_delay_ms: 100,
                ..RetrySettings::default()
            })
            .build()
            .unwrap_err();

        assert!(err.to_string().contains("exceeds maxDelayMs"));
    }

    #[test]
    fn test_from_env_vars() {
        let config = HarmonizerConfig::from_env_vars(env(&[
            ("MUSICBRAINZ_USER_AGENT", "Harmony/2.0 (me@example.com)"),
            ("TIDAL_CLIENT_ID", "abc"),
            ("TIDAL_CLIENT_SECRET", "def"),
            ("DISCOGS_TOKEN", "ghi"),
            ("HARMONIZER_DEFAULT_PROVIDERS", "tidal, musicbrainz"),
        ]))
        .unwrap();

        assert_eq!(config.enabled_providers().len(), 3);
        assert_eq!(
            config.provider(TIDAL).unwrap().credentials.client_secret.as_deref(),
            Some("def")
        );
        assert_eq!(config.default_providers, vec!["tidal", "musicbrainz"]);
        assert!(config.storage.cache_db_path.is_none());
    }

    #[test]
    fn test_from_env_vars_requires_tidal_pair() {
        let err = HarmonizerConfig::from_env_vars(env(&[("TIDAL_CLIENT_ID", "abc")])).unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = HarmonizerConfig::from_json(
            r#"{
                "providers": {
                    "musicbrainz": { "enabled": true, "priority": 120 },
                    "discogs": { "enabled": true, "credentials": { "token": "t" },
                                 "rateLimit": { "maxRequests": 25, "windowMs": 60000 } }
                },
                "cache": { "releaseTtlSecs": 60 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.provider(MUSICBRAINZ).unwrap().priority, Some(120));
        assert_eq!(
            config.provider(DISCOGS).unwrap().rate_limit,
            Some(RateLimitSettings {
                max_requests: 25,
                window_ms: 60_000
            })
        );
        assert_eq!(config.cache.release_ttl_secs, 60);
        assert_eq!(config.cache.track_ttl_secs, 86_400);
        assert_eq!(config.retry.retries, 3);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            HarmonizerConfig::from_json("{not json"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            client_id: Some("visible".to_string()),
            client_secret: Some("hunter2".to_string()),
            token: Some("tok".to_string()),
            user_agent: None,
        };
        let rendered = format!("{:?}", creds);

        assert!(rendered.contains("visible"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
