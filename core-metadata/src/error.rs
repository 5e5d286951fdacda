use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{provider} returned HTTP {status}")]
    Http { provider: String, status: u16 },

    #[error("{provider} rate limit exceeded{}", fmt_retry_after(.retry_after))]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{provider} requires user-level authorization for {operation}")]
    UserAuthNotSupported { provider: String, operation: String },

    #[error("{provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} rejected credentials: {message}")]
    Unauthorized {
        provider: String,
        message: String,
        /// A cached token was discarded, so another attempt may succeed.
        token_invalidated: bool,
    },

    #[error("Authentication error: {0}")]
    Auth(#[from] core_auth::AuthError),

    #[error("{provider} returned an unreadable payload: {message}")]
    Parse { provider: String, message: String },
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

impl MetadataError {
    /// Whether the retry policy should try again.
    ///
    /// Network failures, 5xx responses, explicit throttling and a 401 that
    /// discarded a cached token are transient. Everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::Network { .. } | MetadataError::RateLimited { .. } => true,
            MetadataError::Http { status, .. } => *status >= 500,
            MetadataError::Unauthorized {
                token_invalidated, ..
            } => *token_invalidated,
            MetadataError::Auth(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Server-provided backoff hint
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            MetadataError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            MetadataError::Http { .. } => FailureKind::Http,
            MetadataError::RateLimited { .. } => FailureKind::RateLimited,
            MetadataError::Provider { .. } => FailureKind::Provider,
            MetadataError::ProviderNotFound(_) => FailureKind::ProviderNotFound,
            MetadataError::Validation(_) | MetadataError::Config(_) => FailureKind::Validation,
            MetadataError::UserAuthNotSupported { .. } => FailureKind::UserAuthNotSupported,
            MetadataError::Network { .. } => FailureKind::Network,
            MetadataError::Unauthorized { .. } | MetadataError::Auth(_) => FailureKind::Auth,
            MetadataError::Parse { .. } => FailureKind::Parse,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            MetadataError::Http { status, .. } => Some(*status),
            MetadataError::RateLimited { .. } => Some(429),
            MetadataError::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }
}

/// Coarse failure category carried in lookup results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Http,
    RateLimited,
    Provider,
    ProviderNotFound,
    Validation,
    UserAuthNotSupported,
    Network,
    Auth,
    Parse,
}

/// One provider's failure during a fan-out. Attached to the result instead
/// of failing the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, error: &MetadataError) -> Self {
        Self {
            provider: provider.into(),
            kind: error.kind(),
            message: error.to_string(),
            status: error.status(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
