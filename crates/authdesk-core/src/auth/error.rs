use thiserror::Error;

/// Failures of the session lifecycle.
///
/// Clone so a single refresh outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    VerificationFailed(String),

    #[error("{0}")]
    RefreshFailed(String),

    #[error("Logout request failed: {0}")]
    LogoutFailed(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Session changed while the request was in flight")]
    Superseded,

    #[error("{0}")]
    Callback(String),

    #[error("Sign-in callback was already handled")]
    CallbackAlreadyHandled,
}

impl AuthError {
    pub(crate) fn verification(message: Option<String>) -> Self {
        AuthError::VerificationFailed(
            message.unwrap_or_else(|| "Token verification failed".to_string()),
        )
    }

    pub(crate) fn refresh(message: Option<String>) -> Self {
        AuthError::RefreshFailed(message.unwrap_or_else(|| "Token refresh failed".to_string()))
    }
}
