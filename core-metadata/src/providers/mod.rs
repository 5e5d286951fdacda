//! External Metadata Providers
//!
//! This module contains clients for external metadata services:
//! - MusicBrainz - open music encyclopedia (no auth, strict 1 req/s quota)
//! - Tidal - streaming catalog behind OAuth2 client credentials (JSON:API)
//! - Discogs - release database with a personal access token
//!
//! Every provider implements [`MetadataProvider`] and talks HTTP through a
//! [`ProviderHttp`], which applies the provider's rate limiter, retry policy,
//! authentication and the shared status mapping.

pub mod discogs;
pub mod musicbrainz;
pub mod tidal;

pub use discogs::DiscogsProvider;
pub use musicbrainz::MusicBrainzProvider;
pub use tidal::TidalProvider;

use crate::error::{MetadataError, Result};
use crate::identifiers::{Gtin, Isrc};
use crate::models::{HarmonizedArtist, HarmonizedRelease, HarmonizedTrack};
use crate::rate_limit::{limiter_for, RateLimitBackend, RateLimiter};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::time::{Clock, SystemClock};
use core_auth::ClientCredentialsAuth;
use core_runtime::config::{ProviderSettings, RateLimitSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Kind of entity a provider URL points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Release,
    /// Grouping of releases (MusicBrainz release group, Discogs master)
    ReleaseGroup,
    Track,
    Artist,
    Playlist,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Release => "release",
            EntityType::ReleaseGroup => "release-group",
            EntityType::Track => "track",
            EntityType::Artist => "artist",
            EntityType::Playlist => "playlist",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider-native reference extracted from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub entity_type: EntityType,
    pub id: String,
}

impl ParsedUrl {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }
}

/// Contract every metadata source implements.
///
/// `Ok(None)` means the provider has no such entity. Errors are reserved
/// for failures (transport, auth, throttling, bad payloads).
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Stable identifier used in configuration, cache keys and `externalIds`
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Higher is preferred
    fn priority(&self) -> i32;

    fn parse_url(&self, url: &str) -> Option<ParsedUrl>;

    fn can_handle_url(&self, url: &str) -> bool {
        self.parse_url(url).is_some()
    }

    async fn lookup_by_gtin(&self, gtin: &Gtin) -> Result<Option<HarmonizedRelease>>;

    async fn lookup_release_by_id(&self, id: &str) -> Result<Option<HarmonizedRelease>>;

    async fn lookup_by_url(&self, url: &str) -> Result<Option<HarmonizedRelease>> {
        let parsed = self.parse_url(url).ok_or_else(|| {
            MetadataError::Validation(format!("{} cannot handle URL {}", self.name(), url))
        })?;
        match parsed.entity_type {
            EntityType::Release => self.lookup_release_by_id(&parsed.id).await,
            other => Err(MetadataError::Validation(format!(
                "{} URL points to a {}, not a release: {}",
                self.display_name(),
                other,
                url
            ))),
        }
    }

    async fn lookup_by_isrc(&self, isrc: &Isrc) -> Result<Option<HarmonizedTrack>>;

    async fn lookup_artist(&self, id: &str) -> Result<Option<HarmonizedArtist>>;

    async fn search_releases(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedRelease>>;

    async fn search_tracks(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedTrack>>;

    async fn search_artists(&self, query: &str, limit: usize) -> Result<Vec<HarmonizedArtist>>;
}

/// How a provider authenticates its API calls
#[derive(Clone, Default)]
pub enum ProviderAuth {
    #[default]
    None,
    /// Full `Authorization` header value sent on every request
    StaticToken(String),
    ClientCredentials(Arc<ClientCredentialsAuth>),
}

impl fmt::Debug for ProviderAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderAuth::None => f.write_str("None"),
            ProviderAuth::StaticToken(_) => f.write_str("StaticToken([REDACTED])"),
            ProviderAuth::ClientCredentials(auth) => {
                write!(f, "ClientCredentials({})", auth.state_label())
            }
        }
    }
}

/// Everything a provider constructor needs from the host and configuration
#[derive(Clone)]
pub struct ProviderContext {
    pub http: Arc<dyn HttpClient>,
    pub clock: Arc<dyn Clock>,
    pub settings: ProviderSettings,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitBackend,
    /// Fallback User-Agent when the provider's credentials carry none
    pub user_agent: String,
    pub timeout: Duration,
}

impl ProviderContext {
    pub fn new(http: Arc<dyn HttpClient>, settings: ProviderSettings) -> Self {
        Self {
            http,
            clock: Arc::new(SystemClock),
            settings,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitBackend::Local,
            user_agent: core_runtime::config::DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit_backend(mut self, backend: RateLimitBackend) -> Self {
        self.rate_limit = backend;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn priority_or(&self, default: i32) -> i32 {
        self.settings.priority.unwrap_or(default)
    }

    pub fn base_url_or(&self, default: &str) -> String {
        self.settings
            .base_url
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn user_agent(&self) -> String {
        self.settings
            .credentials
            .user_agent
            .clone()
            .unwrap_or_else(|| self.user_agent.clone())
    }

    /// Request plumbing for `provider`, with its quota taken from settings or
    /// `default_quota`.
    pub fn http_for(
        &self,
        provider: &str,
        default_base_url: &str,
        default_quota: RateLimitSettings,
    ) -> ProviderHttp {
        let quota = self.settings.rate_limit.unwrap_or(default_quota);
        let limiter = limiter_for(provider, &quota, &self.rate_limit, Arc::clone(&self.clock));

        ProviderHttp::new(
            provider,
            self.base_url_or(default_base_url),
            Arc::clone(&self.http),
            limiter,
            self.retry.clone(),
        )
        .with_user_agent(self.user_agent())
        .with_timeout(self.timeout)
    }
}

/// Shared request plumbing: one per provider.
///
/// Every call acquires a rate-limit slot and authorizes the request inside
/// each retry attempt, so retries count against the quota and pick up a
/// refreshed token.
pub struct ProviderHttp {
    provider: String,
    base_url: String,
    accept: &'static str,
    user_agent: String,
    timeout: Duration,
    http: Arc<dyn HttpClient>,
    auth: ProviderAuth,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
}

impl ProviderHttp {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        http: Arc<dyn HttpClient>,
        limiter: Arc<dyn RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            accept: "application/json",
            user_agent: core_runtime::config::DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            http,
            auth: ProviderAuth::None,
            limiter,
            retry,
        }
    }

    pub fn with_auth(mut self, auth: ProviderAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_accept(mut self, accept: &'static str) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &ProviderAuth {
        &self.auth
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` (relative to the base URL) and decode the JSON body.
    ///
    /// `Ok(None)` on 404.
    pub async fn get_json<T>(&self, operation: &str, path: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let url = self.url(path);
        let url = url.as_str();

        self.retry
            .run(&self.provider, operation, move |attempt| async move {
                self.limiter.acquire().await;
                debug!(provider = %self.provider, operation, attempt, url, "Provider request");
                self.attempt(url).await
            })
            .await
    }

    async fn attempt<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let request = HttpRequest::get(url)
            .header("User-Agent", self.user_agent.as_str())
            .header("Accept", self.accept)
            .timeout(self.timeout);
        let (request, bearer) = self.authorize(request).await?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| self.transport_error(e))?;

        self.map_response(response, bearer.as_deref())
    }

    /// Returns the request with credentials attached, plus the fetched
    /// bearer token when one was used.
    async fn authorize(&self, request: HttpRequest) -> Result<(HttpRequest, Option<String>)> {
        match &self.auth {
            ProviderAuth::None => Ok((request, None)),
            ProviderAuth::StaticToken(value) => {
                Ok((request.header("Authorization", value.as_str()), None))
            }
            ProviderAuth::ClientCredentials(auth) => {
                let token = auth.access_token().await?;
                Ok((request.bearer_token(token.clone()), Some(token)))
            }
        }
    }

    /// Uniform status mapping shared by every provider. `bearer` is the
    /// token the request carried; only that token is invalidated on 401.
    pub fn map_response<T: DeserializeOwned>(
        &self,
        response: HttpResponse,
        bearer: Option<&str>,
    ) -> Result<Option<T>> {
        match response.status {
            status if (200..300).contains(&status) => {
                serde_json::from_slice(&response.body)
                    .map(Some)
                    .map_err(|e| MetadataError::Parse {
                        provider: self.provider.clone(),
                        message: e.to_string(),
                    })
            }
            404 => Ok(None),
            401 => {
                let token_invalidated = match (&self.auth, bearer) {
                    (ProviderAuth::ClientCredentials(auth), Some(token)) => auth.invalidate(token),
                    _ => false,
                };
                warn!(provider = %self.provider, token_invalidated, "Request unauthorized");
                Err(MetadataError::Unauthorized {
                    provider: self.provider.clone(),
                    message: body_excerpt(&response),
                    token_invalidated,
                })
            }
            429 => Err(MetadataError::RateLimited {
                provider: self.provider.clone(),
                retry_after: response.retry_after(),
            }),
            status => Err(MetadataError::Http {
                provider: self.provider.clone(),
                status,
            }),
        }
    }

    fn transport_error(&self, err: BridgeError) -> MetadataError {
        MetadataError::Network {
            provider: self.provider.clone(),
            message: err.to_string(),
        }
    }
}

fn body_excerpt(response: &HttpResponse) -> String {
    let text = String::from_utf8_lossy(&response.body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Path segments of `url` when its host is `domain` or a subdomain of it.
///
/// Scheme-less input (`tidal.com/album/1`) is accepted.
pub(crate) fn url_segments(url: &str, domain: &str) -> Option<Vec<String>> {
    let trimmed = url.trim();
    let parsed = url::Url::parse(trimmed)
        .or_else(|_| url::Url::parse(&format!("https://{trimmed}")))
        .ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    if host != domain && !host.ends_with(&format!(".{domain}")) {
        return None;
    }

    let segments = parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();
    Some(segments)
}

/// `PT3M25S` → 205 000 ms. Weeks, days, hours, minutes and (fractional)
/// seconds are understood; years and months are not.
pub fn parse_iso8601_duration_ms(input: &str) -> Option<u64> {
    let rest = input.trim().strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut seconds = sum_designators(date_part, |unit| match unit {
        'W' => Some(604_800.0),
        'D' => Some(86_400.0),
        _ => None,
    })?;
    if let Some(time) = time_part {
        if time.is_empty() {
            return None;
        }
        seconds += sum_designators(time, |unit| match unit {
            'H' => Some(3_600.0),
            'M' => Some(60.0),
            'S' => Some(1.0),
            _ => None,
        })?;
    } else if date_part.is_empty() {
        return None;
    }

    Some((seconds * 1000.0).round() as u64)
}

fn sum_designators(part: &str, unit_seconds: impl Fn(char) -> Option<f64>) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
        } else {
            let value: f64 = number.parse().ok()?;
            total += value * unit_seconds(c)?;
            number.clear();
        }
    }
    number.is_empty().then_some(total)
}

/// `4:44` or `1:02:03` → milliseconds
pub fn parse_clock_duration_ms(input: &str) -> Option<u64> {
    let parts: Vec<&str> = input.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        values.push(part.parse::<u64>().ok()?);
    }

    let (hours, minutes, seconds) = match values.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] if *m < 60 => (*h, *m, *s),
        _ => return None,
    };
    if seconds >= 60 {
        return None;
    }

    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)?
        .checked_mul(1000)
}


#[cfg(test)]
mod tests {
    use super::testing::{context, FixtureHttp};
    use super::*;
    use crate::rate_limit::TokenBucketLimiter;
    use bridge_traits::error::Result as BridgeResult;
    use core_auth::ClientCredentialsConfig;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn plumbing(http: Arc<dyn HttpClient>, retry: RetryPolicy) -> ProviderHttp {
        ProviderHttp::new(
            "tidal",
            "https://api.example.test/v2/",
            http,
            Arc::new(TokenBucketLimiter::new(100, Duration::from_secs(1))),
            retry,
        )
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("/ok", 200, r#"{"id": 1}"#)
                .route("/missing", 404, "")
                .route("/broken", 500, "oops")
                .route("/garbage", 200, "not json")
                .route_response("/slow", {
                    let mut response = HttpResponse::new(429, "");
                    response
                        .headers
                        .insert("Retry-After".to_string(), "7".to_string());
                    response
                }),
        );
        let client = plumbing(http, RetryPolicy::none());

        let ok: Option<Value> = client.get_json("test", "/ok").await.unwrap();
        assert_eq!(ok.unwrap()["id"], 1);

        let missing: Option<Value> = client.get_json("test", "/missing").await.unwrap();
        assert!(missing.is_none());

        let broken = client.get_json::<Value>("test", "/broken").await.unwrap_err();
        assert!(matches!(broken, MetadataError::Http { status: 500, .. }));

        let garbage = client.get_json::<Value>("test", "/garbage").await.unwrap_err();
        assert!(matches!(garbage, MetadataError::Parse { .. }));

        let slow = client.get_json::<Value>("test", "/slow").await.unwrap_err();
        assert_eq!(slow.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_request_headers_and_url() {
        let http = Arc::new(FixtureHttp::new().route("/albums", 200, "{}"));
        let client = plumbing(http.clone(), RetryPolicy::none())
            .with_user_agent("Harmonizer/1.0")
            .with_accept("application/vnd.api+json")
            .with_auth(ProviderAuth::StaticToken("Discogs token=abc".to_string()));

        let _: Option<Value> = client.get_json("test", "albums/1").await.unwrap();

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.example.test/v2/albums/1");
        assert_eq!(request.headers["User-Agent"], "Harmonizer/1.0");
        assert_eq!(request.headers["Accept"], "application/vnd.api+json");
        assert_eq!(request.headers["Authorization"], "Discogs token=abc");
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let http = Arc::new(
            FixtureHttp::new()
                .route("/flaky", 503, "")
                .route("/flaky", 200, r#"{"ok": true}"#),
        );
        let retry = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        let client = plumbing(http.clone(), retry);

        let value: Option<Value> = client.get_json("test", "/flaky").await.unwrap();

        assert_eq!(value.unwrap()["ok"], true);
        assert_eq!(http.request_count(), 2);
    }

    struct TokenServer {
        token_calls: AtomicUsize,
        api_calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for TokenServer {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            if request.url.contains("/token") {
                let n = self.token_calls.fetch_add(1, Ordering::SeqCst);
                let body = format!(
                    r#"{{"access_token":"token-{n}","token_type":"Bearer","expires_in":3600}}"#
                );
                return Ok(HttpResponse::new(200, body));
            }

            self.api_calls.fetch_add(1, Ordering::SeqCst);
            match request.headers.get("Authorization").map(String::as_str) {
                Some("Bearer token-0") => Ok(HttpResponse::new(401, "expired")),
                Some(_) => Ok(HttpResponse::new(200, r#"{"data": []}"#)),
                None => Ok(HttpResponse::new(401, "")),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_invalidates_token_and_retries() {
        let server = Arc::new(TokenServer {
            token_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
        });
        let auth = Arc::new(ClientCredentialsAuth::new(
            ClientCredentialsConfig::new("tidal", "https://auth.example.test/token", "id", "secret"),
            server.clone(),
        ));
        let retry = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        let client = plumbing(server.clone(), retry).with_auth(ProviderAuth::ClientCredentials(auth));

        let value: Option<Value> = client.get_json("test", "albums").await.unwrap();

        assert!(value.is_some());
        assert_eq!(server.token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(server.api_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_token_rejection_is_final() {
        let http = Arc::new(FixtureHttp::new().route("/releases", 401, "invalid token"));
        let client = plumbing(http.clone(), RetryPolicy::default())
            .with_auth(ProviderAuth::StaticToken("Discogs token=bad".to_string()));

        let err = client.get_json::<Value>("test", "/releases/1").await.unwrap_err();

        assert!(matches!(
            err,
            MetadataError::Unauthorized {
                token_invalidated: false,
                ..
            }
        ));
        assert_eq!(http.request_count(), 1);
    }

    #[test]
    fn test_context_applies_overrides() {
        let settings = ProviderSettings::enabled()
            .with_priority(5)
            .with_base_url("http://localhost:9000");
        let ctx = context(Arc::new(FixtureHttp::new()), settings);

        assert_eq!(ctx.priority_or(100), 5);
        assert_eq!(ctx.base_url_or("https://musicbrainz.org/ws/2"), "http://localhost:9000");
        assert_eq!(ctx.user_agent(), "HarmonizerTests/1.0 ( tests@example.org )");
    }

    #[test]
    fn test_url_segments() {
        assert_eq!(
            url_segments("https://www.discogs.com/release/123-Some-Title", "discogs.com"),
            Some(vec!["release".to_string(), "123-Some-Title".to_string()])
        );
        assert_eq!(
            url_segments("tidal.com/browse/album/42", "tidal.com"),
            Some(vec!["browse".to_string(), "album".to_string(), "42".to_string()])
        );
        assert!(url_segments("https://nottidal.com/album/42", "tidal.com").is_none());
        assert!(url_segments("ftp://tidal.com/album/42", "tidal.com").is_none());
    }

    #[test]
    fn test_iso8601_durations() {
        assert_eq!(parse_iso8601_duration_ms("PT3M25S"), Some(205_000));
        assert_eq!(parse_iso8601_duration_ms("PT1H2M3.5S"), Some(3_723_500));
        assert_eq!(parse_iso8601_duration_ms("PT45S"), Some(45_000));
        assert_eq!(parse_iso8601_duration_ms("P1DT1S"), Some(86_401_000));
        assert_eq!(parse_iso8601_duration_ms("PT"), None);
        assert_eq!(parse_iso8601_duration_ms("3M25S"), None);
        assert_eq!(parse_iso8601_duration_ms("PT3X"), None);
        assert_eq!(parse_iso8601_duration_ms("PT25"), None);
    }

    #[test]
    fn test_clock_durations() {
        assert_eq!(parse_clock_duration_ms("4:44"), Some(284_000));
        assert_eq!(parse_clock_duration_ms("1:02:03"), Some(3_723_000));
        assert_eq!(parse_clock_duration_ms("12:00"), Some(720_000));
        assert_eq!(parse_clock_duration_ms(""), None);
        assert_eq!(parse_clock_duration_ms("4:75"), None);
        assert_eq!(parse_clock_duration_ms("abc"), None);
        assert_eq!(parse_clock_duration_ms("99999999999999999:00"), None);
        assert_eq!(parse_clock_duration_ms("18446744073709551615:00:00"), None);
    }
}
