//! Authenticated client for the admin REST API.
//!
//! Every request is decorated with the access token read from the token
//! store at send time. A 401 triggers one shared token refresh and a single
//! replay of the request; the session manager owns the refresh itself.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::{SessionManager, SignInReason};
use crate::models::{
    Application, ApplicationUpdate, Envelope, NewApplication, NewRole, NewUser, ProfileUpdate,
    Role, RoleUpdate, SystemRole, User, UserApplication, UserUpdate, UsersPage,
};

use super::{ApiError, ApiRequest, ApiResponse, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Serialize a request model into a JSON body.
fn to_body<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request: {}", e)))
}

/// API client for the admin endpoints.
/// Clone is cheap - the transport and session are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: SessionManager,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, session: SessionManager) -> Self {
        Self {
            transport,
            session,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }

    /// Override the first rate-limit backoff; later ones double it.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    // ===== Request pipeline =====

    fn decorate(&self, request: ApiRequest) -> ApiRequest {
        match self.session.stored_access_token() {
            Some(token) => request.with_bearer(token),
            None => request,
        }
    }

    /// Execute once, backing off on 429 until the retry budget runs out.
    async fn send_once(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let response = self.transport.execute(request.clone()).await?;
            if response.status != 429 {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(path = %request.path, retry = retries, backoff_ms = backoff.as_millis() as u64, "Rate limited, backing off");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    /// Send an authenticated request, recovering from one 401.
    ///
    /// Non-2xx responses come back as `ApiError`. A request that fails with
    /// 401 after the replay is not retried again.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let response = self.send_once(&self.decorate(request.clone())).await?;
        if response.status != 401 {
            return response.error_for_status();
        }

        debug!(path = %request.path, "Got 401, attempting token refresh");
        let token = match self.session.recover_from_unauthorized().await {
            Ok(token) => token,
            Err(err) => {
                warn!(path = %request.path, error = %err, "Could not recover from 401");
                return Err(ApiError::Unauthorized);
            }
        };

        let retried = self.send_once(&request.with_bearer(token)).await?;
        if retried.status == 401 {
            warn!("Request rejected again after token refresh");
            self.session
                .notify_sign_in_required(SignInReason::Unauthorized);
        }
        retried.error_for_status()
    }

    async fn get_data<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        response.json::<Envelope<T>>()?.into_data()
    }

    async fn ack(&self, request: ApiRequest) -> Result<(), ApiError> {
        let response = self.send(request).await?;
        response.json::<Envelope<Value>>()?.into_ack()
    }

    // ===== Auth =====

    /// Raw status payload; its shape is owned by the backend.
    pub async fn auth_status(&self) -> Result<Value, ApiError> {
        self.send(ApiRequest::get("/auth/status")).await?.json()
    }

    // ===== Users =====

    /// `query` is passed through as-is (page, limit, search, ...).
    pub async fn list_users(&self, query: &[(&str, &str)]) -> Result<UsersPage, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get("/users"), |req, (k, v)| req.with_query(*k, *v));
        self.get_data(request).await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<User, ApiError> {
        self.get_data(ApiRequest::get(format!("/users/{}", user_id)))
            .await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        self.get_data(ApiRequest::post("/users", to_body(user)?))
            .await
    }

    pub async fn update_user(&self, user_id: i64, update: &UserUpdate) -> Result<(), ApiError> {
        self.ack(ApiRequest::put(format!("/users/{}", user_id), to_body(update)?))
            .await
    }

    pub async fn user_applications(&self, user_id: i64) -> Result<Vec<UserApplication>, ApiError> {
        self.get_data(ApiRequest::get(format!("/users/{}/applications", user_id)))
            .await
    }

    pub async fn assign_user_to_application(
        &self,
        user_id: i64,
        application_id: i64,
        role_id: Option<i64>,
    ) -> Result<(), ApiError> {
        let body = json!({ "applicationId": application_id, "roleId": role_id });
        self.ack(ApiRequest::post(format!("/users/{}/assign", user_id), body))
            .await
    }

    // ===== Applications =====

    pub async fn list_applications(&self) -> Result<Vec<Application>, ApiError> {
        self.get_data(ApiRequest::get("/applications")).await
    }

    pub async fn create_application(&self, app: &NewApplication) -> Result<Application, ApiError> {
        self.get_data(ApiRequest::post("/applications", to_body(app)?))
            .await
    }

    pub async fn update_application(
        &self,
        application_id: i64,
        update: &ApplicationUpdate,
    ) -> Result<(), ApiError> {
        self.ack(ApiRequest::put(
            format!("/applications/{}", application_id),
            to_body(update)?,
        ))
        .await
    }

    pub async fn application_roles(&self, application_id: i64) -> Result<Vec<Role>, ApiError> {
        self.get_data(ApiRequest::get(format!("/applications/{}/roles", application_id)))
            .await
    }

    pub async fn create_role(&self, application_id: i64, role: &NewRole) -> Result<Role, ApiError> {
        self.get_data(ApiRequest::post(
            format!("/applications/{}/roles", application_id),
            to_body(role)?,
        ))
        .await
    }

    // ===== Roles =====

    pub async fn list_roles(&self, query: &[(&str, &str)]) -> Result<Vec<Role>, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get("/roles"), |req, (k, v)| req.with_query(*k, *v));
        self.get_data(request).await
    }

    pub async fn update_role(&self, role_id: i64, update: &RoleUpdate) -> Result<(), ApiError> {
        self.ack(ApiRequest::put(format!("/roles/{}", role_id), to_body(update)?))
            .await
    }

    pub async fn delete_role(&self, role_id: i64) -> Result<(), ApiError> {
        self.ack(ApiRequest::delete(format!("/roles/{}", role_id)))
            .await
    }

    pub async fn role_templates(&self) -> Result<Vec<Value>, ApiError> {
        self.get_data(ApiRequest::get("/roles/templates")).await
    }

    // ===== System roles =====

    pub async fn set_global_system_role(
        &self,
        user_id: i64,
        role: SystemRole,
        admin_user_id: i64,
    ) -> Result<(), ApiError> {
        let body = json!({ "systemRole": role.as_str(), "adminUserId": admin_user_id });
        self.ack(ApiRequest::put(format!("/user-roles/{}/global", user_id), body))
            .await
    }

    pub async fn set_app_system_role(
        &self,
        user_id: i64,
        application_id: i64,
        role: SystemRole,
        delegated_permissions: &[String],
        admin_user_id: i64,
    ) -> Result<(), ApiError> {
        let body = json!({
            "systemRole": role.as_str(),
            "delegatedPermissions": delegated_permissions,
            "metadata": {},
            "adminUserId": admin_user_id,
        });
        self.ack(ApiRequest::put(
            format!("/user-roles/{}/application/{}", user_id, application_id),
            body,
        ))
        .await
    }

    pub async fn grant_delegated_permissions(
        &self,
        user_id: i64,
        application_id: i64,
        permissions: &[String],
        admin_user_id: i64,
    ) -> Result<(), ApiError> {
        let body = json!({ "permissions": permissions, "adminUserId": admin_user_id });
        self.ack(ApiRequest::post(
            format!("/user-roles/{}/application/{}/permissions", user_id, application_id),
            body,
        ))
        .await
    }

    pub async fn users_with_roles(&self, query: &[(&str, &str)]) -> Result<Vec<User>, ApiError> {
        let request = query
            .iter()
            .fold(ApiRequest::get("/user-roles"), |req, (k, v)| req.with_query(*k, *v));
        self.get_data(request).await
    }

    // ===== Profile =====

    pub async fn get_profile(&self, user_id: i64) -> Result<User, ApiError> {
        self.get_data(ApiRequest::get(format!("/profile/{}", user_id)))
            .await
    }

    pub async fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<(), ApiError> {
        self.ack(ApiRequest::put(format!("/profile/{}", user_id), to_body(update)?))
            .await
    }

    /// Contact card in `format` (`json` or `vcf`). Returned unparsed.
    pub async fn vcard(&self, user_id: i64, format: &str) -> Result<String, ApiError> {
        let request =
            ApiRequest::get(format!("/profile/{}/vcard", user_id)).with_query("format", format);
        Ok(self.send(request).await?.body)
    }
}
