//! Authentication module for the session/token lifecycle.
//!
//! This module provides:
//! - `SessionManager`: the session state machine (initialize, login, logout, refresh)
//! - `TokenStore`: durable storage for the access and refresh tokens
//! - `CallbackHandler`: one-shot hand-off of identity-provider callbacks to login
//!
//! Tokens are opaque. Their validity is only ever decided by the backend.

pub mod backend;
pub mod callback;
pub mod credentials;
pub mod error;
pub mod manager;
mod refresh;
pub mod state;
pub mod store;

pub use backend::AuthApi;
pub use callback::{CallbackHandler, CallbackTokens};
pub use credentials::KeyringTokenStore;
pub use error::AuthError;
pub use manager::SessionManager;
pub use state::{ActiveSession, SessionEvent, SessionState, SignInReason};
pub use store::{
    FileTokenStore, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
