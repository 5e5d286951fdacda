//! OAuth 2.0 Client Credentials Grant (RFC 6749 §4.4)
//!
//! Application-level tokens for catalog APIs that do not act on behalf of a
//! user. Tokens are cached until shortly before expiry and refreshed through
//! a single-flight state machine: however many lookups need a token at once,
//! exactly one request reaches the token endpoint and everyone else waits for
//! its outcome.
//!
//! # Example
//!
//! ```no_run
//! use core_auth::{ClientCredentialsAuth, ClientCredentialsConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> core_auth::Result<()> {
//! # use bridge_traits::http::HttpClient;
//! # let http_client: Arc<dyn HttpClient> = todo!();
//! let config = ClientCredentialsConfig::new(
//!     "tidal",
//!     "https://auth.tidal.com/v1/oauth2/token",
//!     "client-id",
//!     "client-secret",
//! );
//!
//! let auth = ClientCredentialsAuth::new(config, http_client);
//! let bearer = auth.access_token().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, RefreshOutcome, TokenState};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::{Clock, SystemClock};
use bytes::Bytes;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Client-credentials provider configuration.
#[derive(Clone)]
pub struct ClientCredentialsConfig {
    /// Provider name used in logs and errors
    pub provider: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Optional space-separated scope list
    pub scope: Option<String>,
    /// Refresh this long before the token actually expires
    pub expiry_margin: Duration,
}

impl ClientCredentialsConfig {
    pub fn new(
        provider: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            expiry_margin: Duration::from_secs(60),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl fmt::Debug for ClientCredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsConfig")
            .field("provider", &self.provider)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token cache + fetcher for one provider.
pub struct ClientCredentialsAuth {
    config: ClientCredentialsConfig,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenState>,
}

enum Step {
    Ready(String),
    Wait(watch::Receiver<RefreshOutcome>),
    Lead(watch::Sender<RefreshOutcome>),
}

/// Resets `Refreshing` back to `Absent` if the leading caller is dropped
/// before it publishes an outcome, so the next caller can take over.
struct RefreshGuard<'a> {
    state: &'a Mutex<TokenState>,
    armed: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = lock(self.state);
            if state.is_refreshing() {
                *state = TokenState::Absent;
            }
        }
    }
}

fn lock(state: &Mutex<TokenState>) -> MutexGuard<'_, TokenState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl ClientCredentialsAuth {
    pub fn new(config: ClientCredentialsConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_clock(config, http_client, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ClientCredentialsConfig,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            http_client,
            clock,
            state: Mutex::new(TokenState::Absent),
        }
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Current state label (`absent`, `valid`, `refreshing`)
    pub fn state_label(&self) -> &'static str {
        lock(&self.state).label()
    }

    /// Return a usable bearer token, fetching one if needed.
    ///
    /// Concurrent callers share a single in-flight fetch. A failed fetch is
    /// reported to every caller that was waiting on it and leaves the state
    /// `Absent`, so the next call tries again.
    pub async fn access_token(&self) -> Result<String> {
        loop {
            match self.next_step() {
                Step::Ready(token) => return Ok(token),
                Step::Wait(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        // Leader dropped without publishing; retry from the top.
                        Err(_) => None,
                    };
                    match outcome {
                        Some(Ok(token)) => return Ok(token.value),
                        Some(Err(err)) => return Err(err),
                        None => continue,
                    }
                }
                Step::Lead(tx) => return self.lead_refresh(tx).await,
            }
        }
    }

    /// Drop the cached token after the API rejected `rejected`.
    ///
    /// A newer token cached or in flight since the rejected request was
    /// sent is kept. Returns `true` when the next [`access_token`] call will
    /// not hand out `rejected` again, so a retry is worthwhile.
    ///
    /// [`access_token`]: Self::access_token
    pub fn invalidate(&self, rejected: &str) -> bool {
        let mut state = lock(&self.state);
        match &*state {
            TokenState::Valid(token) if token.value == rejected => {
                *state = TokenState::Absent;
                info!(provider = %self.config.provider, "Invalidated cached access token");
                true
            }
            TokenState::Valid(_) => {
                debug!(provider = %self.config.provider, "Rejected token already replaced");
                true
            }
            TokenState::Refreshing(_) | TokenState::Absent => true,
        }
    }

    fn next_step(&self) -> Step {
        let mut state = lock(&self.state);
        let margin = chrono::Duration::from_std(self.config.expiry_margin)
            .unwrap_or_else(|_| chrono::Duration::zero());

        match &*state {
            TokenState::Valid(token) if !token.is_expired_at(self.clock.now(), margin) => {
                Step::Ready(token.value.clone())
            }
            TokenState::Refreshing(rx) => Step::Wait(rx.clone()),
            _ => {
                let (tx, rx) = watch::channel(None);
                *state = TokenState::Refreshing(rx);
                Step::Lead(tx)
            }
        }
    }

    async fn lead_refresh(&self, tx: watch::Sender<RefreshOutcome>) -> Result<String> {
        let mut guard = RefreshGuard {
            state: &self.state,
            armed: true,
        };

        let result = self.fetch_token().await;

        {
            let mut state = lock(&self.state);
            *state = match &result {
                Ok(token) => TokenState::Valid(token.clone()),
                Err(_) => TokenState::Absent,
            };
        }
        guard.armed = false;

        // No receivers left is fine.
        let _ = tx.send(Some(result.clone()));

        result.map(|token| token.value)
    }

    #[instrument(skip(self), fields(provider = %self.config.provider))]
    async fn fetch_token(&self) -> Result<AccessToken> {
        let mut form = vec![("grant_type", "client_credentials")];
        if let Some(scope) = self.config.scope.as_deref() {
            form.push(("scope", scope));
        }

        let encoded_body = serde_urlencoded::to_string(&form)
            .map_err(|e| AuthError::Other(format!("Failed to encode token request: {}", e)))?;

        let request = HttpRequest::new(HttpMethod::Post, self.config.token_url.clone())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Authorization", self.config.basic_auth_header())
            .body(Bytes::from(encoded_body));

        debug!("Requesting client-credentials token");

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| match e {
                BridgeError::Network(msg) | BridgeError::Timeout(msg) => {
                    AuthError::NetworkError(msg)
                }
                other => AuthError::NetworkError(other.to_string()),
            })?;

        if !response.is_success() {
            let status = response.status;
            let body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            warn!(status, error = %body, "Token endpoint rejected request");

            return Err(if response.is_client_error() {
                AuthError::AuthenticationFailed {
                    provider: self.config.provider.clone(),
                    reason: format!("Token endpoint returned {}: {}", status, body),
                }
            } else {
                AuthError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, body
                ))
            });
        }

        let token_response: TokenResponse = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        info!(
            expires_in = token_response.expires_in,
            "Obtained client-credentials token"
        );

        AccessToken::new(
            token_response.access_token,
            token_response.token_type,
            token_response.expires_in,
            self.clock.now(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::HttpResponse;
    use bridge_traits::time::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    /// Token endpoint fake. Each call returns `token-N` after `delay`.
    struct FakeTokenEndpoint {
        calls: AtomicUsize,
        status: AtomicU16,
        delay: Duration,
        expires_in: i64,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeTokenEndpoint {
        fn new(delay: Duration) -> Arc<Self> {
            Self::with_expires_in(delay, 3600)
        }

        fn with_expires_in(delay: Duration, expires_in: i64) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status: AtomicU16::new(200),
                delay,
                expires_in,
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for FakeTokenEndpoint {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(request);
            tokio::time::sleep(self.delay).await;

            let status = self.status.load(Ordering::SeqCst);
            let body = if status == 200 {
                format!(
                    r#"{{"access_token":"token-{}","token_type":"Bearer","expires_in":{}}}"#,
                    n, self.expires_in
                )
            } else {
                r#"{"error":"invalid_client"}"#.to_string()
            };
            Ok(HttpResponse::new(status, body))
        }
    }

    fn config() -> ClientCredentialsConfig {
        ClientCredentialsConfig::new("tidal", "https://auth.example.com/token", "id", "secret")
    }

    fn start() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_fetch() {
        let endpoint = FakeTokenEndpoint::new(Duration::from_millis(50));
        let auth = Arc::new(ClientCredentialsAuth::new(config(), endpoint.clone()));

        let calls = (0..10).map(|_| {
            let auth = auth.clone();
            async move { auth.access_token().await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(endpoint.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap(), "token-1");
        }
        assert_eq!(auth.state_label(), "valid");
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        let auth = ClientCredentialsAuth::new(config(), endpoint.clone());

        assert_eq!(auth.access_token().await.unwrap(), "token-1");
        assert_eq!(auth.access_token().await.unwrap(), "token-1");
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_refreshed_inside_expiry_margin() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        let clock = Arc::new(ManualClock::new(start()));
        let auth = ClientCredentialsAuth::with_clock(config(), endpoint.clone(), clock.clone());

        assert_eq!(auth.access_token().await.unwrap(), "token-1");

        clock.advance(chrono::Duration::seconds(3500));
        assert_eq!(auth.access_token().await.unwrap(), "token-1");

        clock.advance(chrono::Duration::seconds(41));
        assert_eq!(auth.access_token().await.unwrap(), "token-2");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        let auth = ClientCredentialsAuth::new(config(), endpoint.clone());

        let first = auth.access_token().await.unwrap();

        assert!(auth.invalidate(&first));
        assert_eq!(auth.state_label(), "absent");
        assert_eq!(auth.access_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_stale_rejection_keeps_newer_token() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        let auth = ClientCredentialsAuth::new(config(), endpoint.clone());

        let first = auth.access_token().await.unwrap();
        assert!(auth.invalidate(&first));
        assert_eq!(auth.access_token().await.unwrap(), "token-2");

        // A second request that was sent with token-1 comes back 401 late.
        assert!(auth.invalidate(&first));
        assert_eq!(auth.state_label(), "valid");
        assert_eq!(auth.access_token().await.unwrap(), "token-2");
        assert_eq!(endpoint.calls(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_expires_in_is_capped() {
        let endpoint = FakeTokenEndpoint::with_expires_in(Duration::ZERO, i64::MAX);
        let clock = Arc::new(ManualClock::new(start()));
        let auth = ClientCredentialsAuth::with_clock(config(), endpoint.clone(), clock.clone());

        assert_eq!(auth.access_token().await.unwrap(), "token-1");

        clock.advance(chrono::Duration::seconds(crate::types::MAX_TOKEN_LIFETIME_SECS));
        assert_eq!(auth.access_token().await.unwrap(), "token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_reaches_all_waiters_then_retries() {
        let endpoint = FakeTokenEndpoint::new(Duration::from_millis(20));
        endpoint.status.store(503, Ordering::SeqCst);
        let auth = Arc::new(ClientCredentialsAuth::new(config(), endpoint.clone()));

        let calls = (0..3).map(|_| {
            let auth = auth.clone();
            async move { auth.access_token().await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(endpoint.calls(), 1);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(AuthError::TokenRefreshFailed(_)))));
        assert_eq!(auth.state_label(), "absent");

        endpoint.status.store(200, Ordering::SeqCst);
        assert_eq!(auth.access_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_not_transient() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        endpoint.status.store(401, Ordering::SeqCst);
        let auth = ClientCredentialsAuth::new(config(), endpoint);

        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_rejected_credentials() {
        let endpoint = FakeTokenEndpoint::new(Duration::from_millis(20));
        endpoint.status.store(401, Ordering::SeqCst);
        let auth = Arc::new(ClientCredentialsAuth::new(config(), endpoint.clone()));

        let calls = (0..3).map(|_| {
            let auth = auth.clone();
            async move { auth.access_token().await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(endpoint.calls(), 1);
        for result in results {
            let err = result.unwrap_err();
            assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
            assert!(!err.is_transient());
        }
    }

    #[tokio::test]
    async fn test_request_uses_basic_auth_and_form_body() {
        let endpoint = FakeTokenEndpoint::new(Duration::ZERO);
        let auth = ClientCredentialsAuth::new(config().with_scope("r_usr"), endpoint.clone());

        auth.access_token().await.unwrap();

        let requests = endpoint.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url, "https://auth.example.com/token");
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Basic aWQ6c2VjcmV0")
        );
        let body = String::from_utf8(request.body.as_ref().unwrap().to_vec()).unwrap();
        assert_eq!(body, "grant_type=client_credentials&scope=r_usr");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_leader_releases_refresh() {
        let endpoint = FakeTokenEndpoint::new(Duration::from_millis(100));
        let auth = Arc::new(ClientCredentialsAuth::new(config(), endpoint.clone()));

        let leader = {
            let auth = auth.clone();
            tokio::spawn(async move { auth.access_token().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(auth.state_label(), "refreshing");

        leader.abort();
        let _ = leader.await;
        assert_eq!(auth.state_label(), "absent");

        assert_eq!(auth.access_token().await.unwrap(), "token-2");
    }

    #[test]
    fn test_config_debug_redacts_secret() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("secret\""));
        assert!(rendered.contains("[REDACTED]"));
    }
}
