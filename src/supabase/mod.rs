//! Supabase adapters: GoTrue auth and PostgREST profile rows.
//!
//! SYSTEM CONTEXT
//! ==============
//! Both adapters share one `reqwest::Client`. The profile store reads the
//! bearer token from the auth adapter through [`AccessTokenSource`], so the
//! orchestrator never hands tokens around itself.

pub mod auth;
pub mod pkce;
pub mod rest;

use std::time::Duration;

pub use auth::SupabaseAuth;
pub use rest::PostgrestProfileStore;

use crate::error::IdentityError;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Current bearer credential, if any.
pub trait AccessTokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Build the HTTP client shared by the Supabase adapters.
///
/// # Errors
///
/// Returns [`IdentityError::Transport`] if the TLS backend fails to initialize.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, IdentityError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| IdentityError::Transport(e.to_string()))
}
