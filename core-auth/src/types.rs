use crate::error::{AuthError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Application-level bearer token obtained through the client-credentials
/// grant.
///
/// # Security
///
/// The `Debug` implementation redacts the token value.
///
/// # Examples
///
/// ```
/// use core_auth::AccessToken;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let token = AccessToken::new("eyJhbGciOi...", "Bearer", 3600, now).unwrap();
///
/// assert!(!token.is_expired_at(now, Duration::seconds(60)));
/// assert!(token.is_expired_at(now + Duration::minutes(59), Duration::seconds(60)));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

/// Longest lifetime honoured from a token response. Longer `expires_in`
/// values are capped; negative ones yield an already expired token.
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

impl AccessToken {
    /// Build a token issued at `issued_at` that lives `expires_in` seconds,
    /// clamped to `0..=MAX_TOKEN_LIFETIME_SECS`.
    pub fn new(
        value: impl Into<String>,
        token_type: impl Into<String>,
        expires_in: i64,
        issued_at: DateTime<Utc>,
    ) -> Result<Self> {
        let lifetime = Duration::try_seconds(expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!("expires_in out of range: {expires_in}"))
            })?;
        let expires_at = issued_at.checked_add_signed(lifetime).ok_or_else(|| {
            AuthError::InvalidResponse(format!("Token expiry overflows: {expires_in}s"))
        })?;

        Ok(Self {
            value: value.into(),
            token_type: token_type.into(),
            expires_at,
        })
    }

    /// True once `now` is within `margin` of expiry.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(margin)
            .map_or(true, |deadline| now >= deadline)
    }

    /// Remaining lifetime, or `None` once expired
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            Some(self.expires_at - now)
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Outcome broadcast by the caller performing a refresh. `None` until the
/// refresh settles. Waiters receive the leader's exact error, so a rejected
/// credential stays permanent for every caller.
pub(crate) type RefreshOutcome = Option<std::result::Result<AccessToken, AuthError>>;

/// Cached token state for one provider.
///
/// ```text
/// Absent ──fetch──> Refreshing ──ok──> Valid
///   ^                   │                │
///   └──────error────────┘   expired or invalidated
///   └────────────────────────────────────┘
/// ```
///
/// While `Refreshing`, every other caller holds a clone of the receiver and
/// waits for the single in-flight fetch instead of starting its own.
#[derive(Debug, Default)]
pub enum TokenState {
    #[default]
    Absent,
    Valid(AccessToken),
    Refreshing(watch::Receiver<RefreshOutcome>),
}

impl TokenState {
    pub fn is_refreshing(&self) -> bool {
        matches!(self, TokenState::Refreshing(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TokenState::Absent => "absent",
            TokenState::Valid(_) => "valid",
            TokenState::Refreshing(_) => "refreshing",
        }
    }
}
