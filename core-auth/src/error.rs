use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("Provider {provider} authentication failed: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl AuthError {
    /// Transport-level failures are worth retrying; rejected credentials are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::NetworkError(_) | AuthError::TokenRefreshFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
