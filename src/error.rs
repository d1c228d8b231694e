//! Error taxonomy for the session core.
//!
//! DESIGN
//! ======
//! Adapters translate provider-specific failures (HTTP status codes,
//! PostgREST error codes, `sqlx` errors) into the closed enums below at the
//! boundary. Upstream logic matches on kinds and never inspects raw strings.
//!
//! PROPAGATION
//! ===========
//! `SessionFetchError` and `ProfileFetchError` are absorbed by the
//! orchestrator into its snapshot `error` field. `OAuthInitiationError` and
//! `LogoutError` are returned to the caller because they answer a direct
//! user action.

use std::fmt;

/// Stable machine-readable code plus retry hint for an error value.
pub trait ErrorCode {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// IDENTITY PROVIDER
// =============================================================================

/// Raw failure reported by an [`IdentityProvider`](crate::provider::IdentityProvider) adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("identity request failed: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("identity api error: status {status}")]
    Api { status: u16, body: String },

    /// The provider answered with a body we could not decode.
    #[error("identity response parse failed: {0}")]
    Decode(String),

    /// The operation needs a session and none is held.
    #[error("no active session")]
    NoSession,

    /// A code exchange arrived without a matching PKCE verifier.
    #[error("no pending oauth verifier")]
    MissingVerifier,
}

impl ErrorCode for IdentityError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "E_IDENTITY_TRANSPORT",
            Self::Api { .. } => "E_IDENTITY_API",
            Self::Decode(_) => "E_IDENTITY_DECODE",
            Self::NoSession => "E_NO_SESSION",
            Self::MissingVerifier => "E_MISSING_VERIFIER",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Api { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// SESSION FETCH
// =============================================================================

/// The identity provider failed to answer after the retry budget was spent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFetchError {
    #[error("session fetch failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: IdentityError,
    },
}

impl ErrorCode for SessionFetchError {
    fn error_code(&self) -> &'static str {
        "E_SESSION_FETCH"
    }
}

// =============================================================================
// PROFILE FETCH
// =============================================================================

/// Closed classification of profile store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileErrorKind {
    /// Credential rejected (expired JWT, PostgREST `PGRST301`, HTTP 401).
    Auth,
    /// Network-level failure.
    Transport,
    /// Rows came back in an unexpected shape.
    Decode,
    /// Any other store-side failure.
    Store,
}

impl ProfileErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for ProfileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The profile store failed. Never forces a logout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("profile fetch failed ({kind}): {message}")]
pub struct ProfileFetchError {
    pub kind: ProfileErrorKind,
    pub message: String,
}

impl ProfileFetchError {
    pub fn new(kind: ProfileErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    #[must_use]
    pub fn is_auth(&self) -> bool {
        self.kind == ProfileErrorKind::Auth
    }
}

impl ErrorCode for ProfileFetchError {
    fn error_code(&self) -> &'static str {
        match self.kind {
            ProfileErrorKind::Auth => "E_PROFILE_AUTH",
            ProfileErrorKind::Transport => "E_PROFILE_TRANSPORT",
            ProfileErrorKind::Decode => "E_PROFILE_DECODE",
            ProfileErrorKind::Store => "E_PROFILE_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self.kind, ProfileErrorKind::Auth | ProfileErrorKind::Transport)
    }
}

// =============================================================================
// LOGIN / LOGOUT
// =============================================================================

/// The OAuth redirect could not be started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not start sign-in with {provider}. Please try again.")]
pub struct OAuthInitiationError {
    pub provider: String,
    #[source]
    pub source: IdentityError,
}

impl ErrorCode for OAuthInitiationError {
    fn error_code(&self) -> &'static str {
        "E_OAUTH_INITIATION"
    }
}

/// Sign-out did not complete; local state was left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Sign-out did not complete: {0}")]
pub struct LogoutError(#[from] pub IdentityError);

impl ErrorCode for LogoutError {
    fn error_code(&self) -> &'static str {
        "E_LOGOUT"
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing { .. } => "E_CONFIG_MISSING",
            Self::Invalid { .. } => "E_CONFIG_INVALID",
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
