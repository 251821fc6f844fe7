//! Core library for authdesk.
//!
//! This crate contains the non-UI parts of the administration console:
//! - `auth`: token storage, the session manager state machine, refresh coordination
//! - `api`: HTTP transport and the authenticated admin API client
//! - `models`: users, applications, roles as returned by the backend
//! - `config`: application configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, HttpTransport, Transport};
pub use auth::{
    AuthError, SessionEvent, SessionManager, SessionState, SignInReason, TokenStore,
};
pub use config::{Config, TokenStorage};
