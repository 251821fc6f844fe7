//! REST API client module for the authentication service.
//!
//! This module provides the `ApiClient` for the admin endpoints (users,
//! applications, roles, profiles) and the `Transport` seam it sends through.
//!
//! Every request carries the bearer token currently in the token store.
//! A 401 triggers one shared refresh and a single replay of the request.

pub mod client;
pub mod error;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
