//! The three unauthenticated session endpoints: verify, refresh, logout.
//!
//! These go straight to the transport. They are never decorated from the
//! token store and never recovered on 401, so a rejected token cannot
//! recurse into another refresh.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::models::User;

use super::AuthError;

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    success: bool,
    user: Option<User>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    access_token: Option<String>,
    message: Option<String>,
}

/// Message to surface for a failed call: the backend's own `message` when it
/// sent one, otherwise nothing (callers substitute a generic text).
fn failure_message(result: &Result<ApiResponse, ApiError>) -> Option<String> {
    match result {
        Ok(response) => ApiError::backend_message(&response.body),
        Err(_) => None,
    }
}

#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn Transport>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Verify an access token and return the user it belongs to.
    pub async fn verify(&self, token: &str) -> Result<User, AuthError> {
        let result = self
            .transport
            .execute(ApiRequest::post("/auth/verify", json!({ "token": token })))
            .await;

        let response = match result {
            Ok(ref response) if response.is_success() => response,
            _ => {
                debug!(outcome = ?result.as_ref().map(|r| r.status), "Verify request failed");
                return Err(AuthError::verification(failure_message(&result)));
            }
        };

        let body: VerifyResponse = response
            .json()
            .map_err(|e| AuthError::verification(Some(e.to_string())))?;
        match body {
            VerifyResponse {
                success: true,
                user: Some(user),
                ..
            } => Ok(user),
            VerifyResponse { message, .. } => Err(AuthError::verification(message)),
        }
    }

    /// Exchange a refresh token for a new access token.
    /// The refresh token itself is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let result = self
            .transport
            .execute(ApiRequest::post(
                "/auth/refresh",
                json!({ "refreshToken": refresh_token }),
            ))
            .await;

        let response = match result {
            Ok(ref response) if response.is_success() => response,
            _ => {
                debug!(outcome = ?result.as_ref().map(|r| r.status), "Refresh request failed");
                return Err(AuthError::refresh(failure_message(&result)));
            }
        };

        let body: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::refresh(Some(e.to_string())))?;
        match body {
            RefreshResponse {
                success: true,
                access_token: Some(token),
                ..
            } if !token.is_empty() => Ok(token),
            RefreshResponse { message, .. } => Err(AuthError::refresh(message)),
        }
    }

    /// Invalidate a refresh token on the backend. The current access token,
    /// if any, is attached as the bearer credential.
    pub async fn logout(
        &self,
        refresh_token: &str,
        access_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut request = ApiRequest::post("/auth/logout", json!({ "refreshToken": refresh_token }));
        if let Some(token) = access_token {
            request = request.with_bearer(token);
        }

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| AuthError::LogoutFailed(e.to_string()))?;
        response
            .error_for_status()
            .map(|_| ())
            .map_err(|e| AuthError::LogoutFailed(e.to_string()))
    }
}
