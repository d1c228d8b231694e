//! Session model, principal mapping, and the retrying session fetcher.
//!
//! ARCHITECTURE
//! ============
//! The identity provider hands back an opaque session carrying an access
//! token, an absolute expiry, and the raw provider user. This module keeps
//! that shape, derives the local [`Principal`] from it, and wraps the single
//! "get current session" call in the shared fixed-delay retry loop.
//!
//! TRADE-OFFS
//! ==========
//! A session that has not rotated yet (expired, or missing its token) is
//! treated as "not yet usable" rather than as an error, so the fetcher keeps
//! retrying and finally reports absence instead of failing.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IdentityError, SessionFetchError};
use crate::provider::IdentityProvider;
use crate::retry::{RetryPolicy, with_retry};

pub const DEFAULT_ROLE: &str = "user";
pub const FALLBACK_DISPLAY_NAME: &str = "User";

/// Current wall-clock time in whole seconds since the Unix epoch.
#[must_use]
pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

// =============================================================================
// EXTERNAL USER
// =============================================================================

/// User object as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
}

fn meta_str<'a>(meta: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    meta.get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// =============================================================================
// SESSION
// =============================================================================

/// Provider session. Tokens are never printed by `Debug`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry, seconds since epoch.
    pub expires_at: i64,
    pub user: ExternalUser,
}

impl Session {
    /// Usable iff a credential is present and the expiry is strictly in the future.
    #[must_use]
    pub fn is_usable_at(&self, now_secs: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at > now_secs
    }

    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.is_usable_at(now_epoch_secs())
    }

    /// True when the session expires within `margin_secs` of `now_secs`.
    #[must_use]
    pub fn expires_within(&self, margin_secs: i64, now_secs: i64) -> bool {
        self.expires_at.saturating_sub(now_secs) <= margin_secs
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user.id)
            .finish()
    }
}

// =============================================================================
// PRINCIPAL
// =============================================================================

/// Local view of the authenticated user. Rebuilt on every session fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: String,
}

impl Principal {
    /// Map a provider user into a principal.
    ///
    /// Display name: `full_name`, then `name`, then the email local part,
    /// then `"User"`. Role defaults to `"user"`.
    #[must_use]
    pub fn from_user(user: &ExternalUser) -> Self {
        let email = user.email.clone().unwrap_or_default();
        let name = meta_str(&user.user_metadata, "full_name")
            .or_else(|| meta_str(&user.user_metadata, "name"))
            .map(str::to_owned)
            .or_else(|| {
                email
                    .split('@')
                    .next()
                    .filter(|local| !local.is_empty())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_owned());
        let avatar_url = meta_str(&user.user_metadata, "avatar_url")
            .or_else(|| meta_str(&user.user_metadata, "picture"))
            .map(str::to_owned);
        let role = meta_str(&user.app_metadata, "role")
            .or_else(|| meta_str(&user.user_metadata, "role"))
            .unwrap_or(DEFAULT_ROLE)
            .to_owned();

        Self { id: user.id.clone(), email, name, avatar_url, role }
    }
}

// =============================================================================
// SESSION FETCHER
// =============================================================================

/// Fetch a usable session, retrying transient failures and unrotated tokens.
///
/// Returns `Ok(None)` when the final attempt found no usable session.
///
/// # Errors
///
/// Returns [`SessionFetchError::Exhausted`] when the final attempt failed.
pub async fn fetch_session_with_retry(
    identity: &dyn IdentityProvider,
    policy: RetryPolicy,
) -> Result<Option<Session>, SessionFetchError> {
    let attempts = policy.attempts();
    with_retry(policy, "get_session", |attempt| attempt_session(identity, attempt))
        .await
        .map_err(|source| SessionFetchError::Exhausted { attempts, source })
}

/// One `get_session` call; `Ok(None)` when no usable session came back.
async fn attempt_session(identity: &dyn IdentityProvider, attempt: u32) -> Result<Option<Session>, IdentityError> {
    match identity.get_session().await? {
        Some(session) if session.is_usable() => Ok(Some(session)),
        Some(session) => {
            debug!(attempt, expires_at = session.expires_at, "session not yet usable");
            Ok(None)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
