//! Test doubles for the transport layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{ApiError, ApiRequest, ApiResponse, Method, Transport};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

pub(crate) fn json_response(status: u16, body: Value) -> Result<ApiResponse, ApiError> {
    Ok(ApiResponse {
        status,
        body: body.to_string(),
    })
}

/// Transport that answers from a closure and records every request.
pub(crate) struct ScriptedTransport {
    handler: Handler,
    delays: Vec<(String, Duration)>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(
        handler: impl Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            delays: Vec::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        if let Some((_, delay)) = self.delays.iter().find(|(path, _)| *path == request.path) {
            tokio::time::sleep(*delay).await;
        }
        (self.handler)(&request)
    }
}

/// In-memory stand-in for the auth service.
///
/// Access tokens are valid if listed or issued by a refresh grant.
/// Protected routes answer `{ success: true, data }` for a valid bearer and
/// 401 otherwise.
#[derive(Default, Clone)]
pub(crate) struct FakeBackend {
    valid_access: Vec<String>,
    refresh_grants: Vec<(String, String)>,
    routes: Vec<(Method, String, Value)>,
    delays: Vec<(String, Duration)>,
    verify_timeout: bool,
    failing_logout: bool,
}

impl FakeBackend {
    pub(crate) const USER_ID: i64 = 1;

    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_valid_access(mut self, token: &str) -> Self {
        self.valid_access.push(token.to_string());
        self
    }

    /// `refresh_token` may be exchanged for `access_token`
    pub(crate) fn with_refresh_grant(mut self, refresh_token: &str, access_token: &str) -> Self {
        self.refresh_grants
            .push((refresh_token.to_string(), access_token.to_string()));
        self
    }

    pub(crate) fn with_route(mut self, method: Method, path: &str, data: Value) -> Self {
        self.routes.push((method, path.to_string(), data));
        self
    }

    pub(crate) fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.push((path.to_string(), delay));
        self
    }

    pub(crate) fn with_verify_timeout(mut self) -> Self {
        self.verify_timeout = true;
        self
    }

    pub(crate) fn with_failing_logout(mut self) -> Self {
        self.failing_logout = true;
        self
    }

    fn is_valid(&self, token: &str) -> bool {
        self.valid_access.iter().any(|t| t == token)
            || self.refresh_grants.iter().any(|(_, access)| access == token)
    }

    fn user() -> Value {
        json!({
            "id": Self::USER_ID,
            "email": "admin@example.com",
            "firstName": "Ada",
            "lastName": "Admin",
            "systemRole": "administrator"
        })
    }

    fn unauthorized(message: &str) -> Result<ApiResponse, ApiError> {
        json_response(401, json!({ "success": false, "message": message }))
    }

    fn handle(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let body = req.body.clone().unwrap_or(Value::Null);
        match req.path.as_str() {
            "/auth/verify" => {
                if self.verify_timeout {
                    return Err(ApiError::Timeout);
                }
                match body["token"].as_str() {
                    Some(token) if self.is_valid(token) => {
                        json_response(200, json!({ "success": true, "user": Self::user() }))
                    }
                    _ => Self::unauthorized("Invalid token"),
                }
            }
            "/auth/refresh" => {
                let grant = self
                    .refresh_grants
                    .iter()
                    .find(|(refresh, _)| body["refreshToken"] == refresh.as_str());
                match grant {
                    Some((_, access)) => {
                        json_response(200, json!({ "success": true, "accessToken": access }))
                    }
                    None => Self::unauthorized("Invalid refresh token"),
                }
            }
            "/auth/logout" => {
                if self.failing_logout {
                    Err(ApiError::NetworkError("connection reset".to_string()))
                } else {
                    json_response(200, json!({ "success": true }))
                }
            }
            path => {
                if !req.bearer.as_deref().is_some_and(|t| self.is_valid(t)) {
                    return Self::unauthorized("Invalid or expired token");
                }
                match self
                    .routes
                    .iter()
                    .find(|(method, route, _)| *method == req.method && route == path)
                {
                    Some((_, _, data)) => json_response(200, json!({ "success": true, "data": data })),
                    None => json_response(404, json!({ "success": false, "message": "Not found" })),
                }
            }
        }
    }

    pub(crate) fn into_transport(self) -> Arc<ScriptedTransport> {
        let delays = self.delays.clone();
        Arc::new(ScriptedTransport {
            handler: Box::new(move |req| self.handle(req)),
            delays,
            requests: Mutex::new(Vec::new()),
        })
    }
}
