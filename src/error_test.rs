use super::*;

// =============================================================================
// IdentityError
// =============================================================================

#[test]
fn identity_transport_is_retryable() {
    assert!(IdentityError::Transport("reset".into()).retryable());
}

#[test]
fn identity_api_retryable_only_for_throttle_and_server_errors() {
    assert!(IdentityError::Api { status: 429, body: String::new() }.retryable());
    assert!(IdentityError::Api { status: 503, body: String::new() }.retryable());
    assert!(!IdentityError::Api { status: 400, body: String::new() }.retryable());
    assert!(!IdentityError::Api { status: 401, body: String::new() }.retryable());
}

#[test]
fn identity_no_session_code() {
    assert_eq!(IdentityError::NoSession.error_code(), "E_NO_SESSION");
    assert!(!IdentityError::NoSession.retryable());
}

// =============================================================================
// SessionFetchError
// =============================================================================

#[test]
fn session_fetch_error_display_mentions_attempts() {
    let err = SessionFetchError::Exhausted { attempts: 3, source: IdentityError::Transport("timeout".into()) };
    let msg = err.to_string();
    assert!(msg.contains("3 attempt"));
    assert!(msg.contains("timeout"));
    assert_eq!(err.error_code(), "E_SESSION_FETCH");
}

// =============================================================================
// ProfileFetchError
// =============================================================================

#[test]
fn profile_fetch_error_display_includes_kind() {
    let err = ProfileFetchError::new(ProfileErrorKind::Auth, "JWT expired");
    assert_eq!(err.to_string(), "profile fetch failed (auth): JWT expired");
    assert!(err.is_auth());
}

#[test]
fn profile_fetch_error_codes_per_kind() {
    let codes = [
        (ProfileErrorKind::Auth, "E_PROFILE_AUTH"),
        (ProfileErrorKind::Transport, "E_PROFILE_TRANSPORT"),
        (ProfileErrorKind::Decode, "E_PROFILE_DECODE"),
        (ProfileErrorKind::Store, "E_PROFILE_STORE"),
    ];
    for (kind, code) in codes {
        assert_eq!(ProfileFetchError::new(kind, "x").error_code(), code);
    }
}

#[test]
fn profile_decode_is_not_retryable() {
    assert!(!ProfileFetchError::new(ProfileErrorKind::Decode, "bad row").retryable());
    assert!(ProfileFetchError::new(ProfileErrorKind::Transport, "reset").retryable());
}

// =============================================================================
// Login / logout
// =============================================================================

#[test]
fn oauth_initiation_error_is_user_facing() {
    let err = OAuthInitiationError { provider: "google".into(), source: IdentityError::Transport("dns".into()) };
    let msg = err.to_string();
    assert!(msg.contains("google"));
    assert!(!msg.contains("dns"));
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
fn logout_error_wraps_identity_error() {
    let err: LogoutError = IdentityError::Api { status: 500, body: "boom".into() }.into();
    assert!(err.to_string().contains("did not complete"));
    assert!(err.retryable());
}

#[test]
fn config_error_display() {
    let err = ConfigError::Invalid { var: "PORT", value: "abc".into() };
    assert_eq!(err.to_string(), "invalid value for PORT: abc");
    assert_eq!(ConfigError::Missing { var: "SUPABASE_URL" }.error_code(), "E_CONFIG_MISSING");
}
