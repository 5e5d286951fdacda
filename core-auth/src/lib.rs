//! # Authentication Module
//!
//! Application-level credentials for metadata provider APIs.
//!
//! ## Overview
//!
//! Providers authenticate in one of three ways: not at all, with a static
//! personal token sent on every request, or with an OAuth 2.0
//! client-credentials token that has to be fetched and refreshed. This crate
//! implements the last one. End-user OAuth flows are not supported.
//!
//! ## Features
//!
//! - Client-credentials token exchange with HTTP Basic client authentication
//! - Expiry-aware caching with a configurable refresh margin
//! - Single-flight refresh: concurrent callers share one token request
//! - Explicit invalidation after the API answers 401

pub mod client_credentials;
pub mod error;
pub mod types;

pub use client_credentials::{ClientCredentialsAuth, ClientCredentialsConfig};
pub use error::{AuthError, Result};
pub use types::{AccessToken, TokenState};
