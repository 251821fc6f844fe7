//! Hand-off from the identity provider's redirect to `SessionManager::login`.
//!
//! The provider redirects to the callback route with `token` and
//! `refreshToken` query parameters (or `error`/`message` on failure).

use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::Url;
use tracing::debug;

use crate::models::User;

use super::{AuthError, SessionManager};

/// Base used to resolve callback paths given without scheme and host
const RELATIVE_BASE: &str = "http://localhost/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackTokens {
    pub token: String,
    pub refresh_token: String,
}

impl CallbackTokens {
    /// Parse an absolute URL or a path such as `/callback?token=..&refreshToken=..`.
    pub fn from_url(callback_url: &str) -> Result<Self, AuthError> {
        let url = Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(callback_url))
            .map_err(|e| AuthError::Callback(format!("Invalid callback URL: {}", e)))?;

        let mut token = None;
        let mut refresh_token = None;
        let mut error = None;
        let mut message = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "token" => token = Some(value.into_owned()),
                "refreshToken" => refresh_token = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "message" => message = Some(value.into_owned()),
                _ => {}
            }
        }

        match (error, token, refresh_token) {
            (None, Some(token), Some(refresh_token))
                if !token.is_empty() && !refresh_token.is_empty() =>
            {
                Ok(Self {
                    token,
                    refresh_token,
                })
            }
            _ => Err(AuthError::Callback(
                message.unwrap_or_else(|| "Authentication failed".to_string()),
            )),
        }
    }
}

/// Forwards the callback to login exactly once, however many times the
/// callback route is re-entered.
pub struct CallbackHandler {
    session: SessionManager,
    handled: AtomicBool,
}

impl CallbackHandler {
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            handled: AtomicBool::new(false),
        }
    }

    pub async fn handle(&self, callback_url: &str) -> Result<User, AuthError> {
        if self.handled.swap(true, Ordering::SeqCst) {
            debug!("Ignoring repeated sign-in callback");
            return Err(AuthError::CallbackAlreadyHandled);
        }

        let tokens = CallbackTokens::from_url(callback_url)?;
        self.session.login(&tokens.token, &tokens.refresh_token).await
    }
}
