//! Data models for the authentication service admin API.
//!
//! Every endpoint wraps its payload in the same envelope:
//! `{ "success": bool, "data": ..., "message": "..." }`.

pub mod application;
pub mod role;
pub mod user;

pub use application::{Application, ApplicationUpdate, NewApplication};
pub use role::{NewRole, Role, RoleScope, RoleUpdate};
pub use user::{NewUser, ProfileUpdate, SystemRole, User, UserApplication, UserUpdate, UsersPage};

use serde::Deserialize;

use crate::api::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    fn rejection(message: Option<String>) -> ApiError {
        ApiError::Rejected(message.unwrap_or_else(|| "Request failed".to_string()))
    }

    /// Unwrap the payload, treating `success: false` as a rejection.
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(Self::rejection(self.message));
        }
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("Response is missing data".to_string()))
    }

    /// For endpoints that only acknowledge (update/delete); data is ignored.
    pub fn into_ack(self) -> Result<(), ApiError> {
        if self.success {
            Ok(())
        } else {
            Err(Self::rejection(self.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success() {
        let env: Envelope<Vec<i64>> =
            serde_json::from_str(r#"{"success":true,"data":[1,2]}"#).expect("valid json");
        assert_eq!(env.into_data(), Ok(vec![1, 2]));
    }

    #[test]
    fn test_envelope_rejected_with_message() {
        let env: Envelope<Vec<i64>> =
            serde_json::from_str(r#"{"success":false,"message":"Forbidden scope"}"#)
                .expect("valid json");
        assert_eq!(
            env.into_data(),
            Err(ApiError::Rejected("Forbidden scope".to_string()))
        );
    }

    #[test]
    fn test_envelope_missing_data() {
        let env: Envelope<Vec<i64>> =
            serde_json::from_str(r#"{"success":true}"#).expect("valid json");
        assert!(matches!(env.into_data(), Err(ApiError::InvalidResponse(_))));

        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":true}"#).expect("valid json");
        assert_eq!(env.into_ack(), Ok(()));
    }
}
