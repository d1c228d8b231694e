//! External collaborator seams: identity provider, profile store, navigation.
//!
//! SYSTEM CONTEXT
//! ==============
//! The orchestrator only ever talks to these traits. Production wiring uses
//! the Supabase and Postgres adapters; tests inject scripted mocks from
//! [`test_helpers`].

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{IdentityError, ProfileFetchError};
use crate::profile::ProfileRecord;
use crate::session::{ExternalUser, Session};

const AUTH_EVENT_CAPACITY: usize = 32;

// =============================================================================
// AUTH EVENTS
// =============================================================================

/// Kind of auth-change notification emitted by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// One auth-change notification.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

impl AuthChange {
    #[must_use]
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }
}

/// Fan-out channel for auth-change events. Dropping a receiver unsubscribes it.
#[derive(Debug, Clone)]
pub struct AuthEventBus {
    tx: broadcast::Sender<AuthChange>,
}

impl AuthEventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.tx.subscribe()
    }

    /// Deliver to current subscribers. Having none is not an error.
    pub fn emit(&self, change: AuthChange) {
        let kind = change.kind;
        match self.tx.send(change) {
            Ok(receivers) => debug!(?kind, receivers, "auth event emitted"),
            Err(_) => debug!(?kind, "auth event emitted with no subscribers"),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for AuthEventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Where the browser should be sent to start an OAuth sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OAuthRedirect {
    pub provider: String,
    pub url: String,
}

/// Hosted identity / session provider.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, or `None` when signed out.
    async fn get_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Raw provider user for the current session.
    async fn get_user(&self) -> Result<ExternalUser, IdentityError>;

    /// Force a token refresh. `None` when there is nothing to refresh.
    async fn refresh_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Prepare an OAuth redirect for `provider` returning to `redirect_to`.
    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<OAuthRedirect, IdentityError>;

    /// Exchange an OAuth callback code for a session.
    async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError>;

    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Subscribe to auth-change events.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange>;
}

/// Tabular store holding office/role assignments.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    async fn query_profile_records(&self, principal_id: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError>;
}

/// Moves the user to another entry point (the login page after sign-out).
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
}

/// Navigator for the HTTP surface: records the pending redirect so the next
/// state poll can hand it to the browser.
#[derive(Debug, Default)]
pub struct PendingRedirect {
    target: Mutex<Option<String>>,
}

impl PendingRedirect {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the pending redirect, leaving none behind.
    pub fn take(&self) -> Option<String> {
        self.target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn peek(&self) -> Option<String> {
        self.target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for PendingRedirect {
    fn navigate(&self, path: &str) {
        info!(path, "redirect scheduled");
        *self
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(path.to_owned());
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::Notify;

    use super::*;
    use crate::session::now_epoch_secs;

    /// Provider user with a full name and an admin role.
    #[must_use]
    pub fn sample_user(id: &str) -> ExternalUser {
        ExternalUser {
            id: id.to_owned(),
            email: Some(format!("{id}@office.test")),
            user_metadata: serde_json::json!({ "full_name": "Dana Office", "avatar_url": "https://img.test/a.png" }),
            app_metadata: serde_json::json!({ "role": "admin" }),
        }
    }

    /// Session for `user_id` expiring `expires_in` seconds from now.
    #[must_use]
    pub fn sample_session(user_id: &str, expires_in: i64) -> Session {
        Session {
            access_token: format!("access-{user_id}-{expires_in}"),
            refresh_token: Some(format!("refresh-{user_id}")),
            expires_at: now_epoch_secs() + expires_in,
            user: sample_user(user_id),
        }
    }

    #[must_use]
    pub fn sample_record(user_id: &str, office_id: &str) -> ProfileRecord {
        ProfileRecord {
            user_id: user_id.to_owned(),
            office_id: office_id.to_owned(),
            office_name: format!("Office {office_id}"),
            office_type: "branch".into(),
            office_location: "Main St".into(),
            role_id: "r-admin".into(),
            role_name: "admin".into(),
            role_description: "Administrator".into(),
            permissions: vec!["inventory:read".into(), "inventory:write".into()],
            assigned_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    // -------------------------------------------------------------------------
    // MockIdentity
    // -------------------------------------------------------------------------

    /// Identity provider with scripted `get_session` answers.
    ///
    /// Once the script runs dry, `get_session` returns `fallback`.
    pub struct MockIdentity {
        script: Mutex<VecDeque<Result<Option<Session>, IdentityError>>>,
        fallback: Mutex<Option<Session>>,
        refreshed: Mutex<Option<Session>>,
        sign_out_result: Mutex<Result<(), IdentityError>>,
        pub bus: AuthEventBus,
        pub get_session_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub sign_out_calls: AtomicUsize,
        pub subscribe_calls: AtomicUsize,
    }

    impl MockIdentity {
        #[must_use]
        pub fn new() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Mutex::new(None),
                refreshed: Mutex::new(None),
                sign_out_result: Mutex::new(Ok(())),
                bus: AuthEventBus::new(),
                get_session_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
                sign_out_calls: AtomicUsize::new(0),
                subscribe_calls: AtomicUsize::new(0),
            }
        }

        /// Always answers with `session`.
        #[must_use]
        pub fn with_session(session: Session) -> Self {
            let mock = Self::new();
            *mock.fallback.lock().unwrap() = Some(session);
            mock
        }

        pub fn push(&self, answer: Result<Option<Session>, IdentityError>) {
            self.script.lock().unwrap().push_back(answer);
        }

        pub fn set_refreshed(&self, session: Option<Session>) {
            *self.refreshed.lock().unwrap() = session;
        }

        pub fn fail_sign_out(&self, err: IdentityError) {
            *self.sign_out_result.lock().unwrap() = Err(err);
        }

        pub fn calls(&self) -> usize {
            self.get_session_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IdentityProvider for MockIdentity {
        async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
            self.get_session_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(self.fallback.lock().unwrap().clone()))
        }

        async fn get_user(&self) -> Result<ExternalUser, IdentityError> {
            self.fallback
                .lock()
                .unwrap()
                .as_ref()
                .map(|s| s.user.clone())
                .ok_or(IdentityError::NoSession)
        }

        async fn refresh_session(&self) -> Result<Option<Session>, IdentityError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.refreshed.lock().unwrap().clone())
        }

        async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<OAuthRedirect, IdentityError> {
            if provider == "broken" {
                return Err(IdentityError::Transport("provider unreachable".into()));
            }
            Ok(OAuthRedirect {
                provider: provider.to_owned(),
                url: format!("https://idp.test/authorize?provider={provider}&redirect_to={redirect_to}"),
            })
        }

        async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError> {
            if code.is_empty() {
                return Err(IdentityError::MissingVerifier);
            }
            let session = sample_session("u-oauth", 3600);
            *self.fallback.lock().unwrap() = Some(session.clone());
            self.bus.emit(AuthChange::new(AuthEventKind::SignedIn, Some(session.clone())));
            Ok(session)
        }

        async fn sign_out(&self) -> Result<(), IdentityError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            self.sign_out_result.lock().unwrap().clone()?;
            *self.fallback.lock().unwrap() = None;
            self.bus.emit(AuthChange::new(AuthEventKind::SignedOut, None));
            Ok(())
        }

        fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            self.bus.subscribe()
        }
    }

    // -------------------------------------------------------------------------
    // MockProfiles
    // -------------------------------------------------------------------------

    /// Profile store with scripted answers and an optional gate that holds
    /// each query in flight until released.
    pub struct MockProfiles {
        script: Mutex<VecDeque<Result<Vec<ProfileRecord>, ProfileFetchError>>>,
        fallback: Mutex<Vec<ProfileRecord>>,
        gate: Option<Arc<Notify>>,
        pub calls: AtomicUsize,
    }

    impl MockProfiles {
        /// Always answers with `records`.
        #[must_use]
        pub fn with_records(records: Vec<ProfileRecord>) -> Self {
            Self { script: Mutex::new(VecDeque::new()), fallback: Mutex::new(records), gate: None, calls: AtomicUsize::new(0) }
        }

        /// Like `with_records`, but each query waits on the returned gate.
        #[must_use]
        pub fn gated(records: Vec<ProfileRecord>) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let mut mock = Self::with_records(records);
            mock.gate = Some(gate.clone());
            (mock, gate)
        }

        pub fn push(&self, answer: Result<Vec<ProfileRecord>, ProfileFetchError>) {
            self.script.lock().unwrap().push_back(answer);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ProfileStore for MockProfiles {
        async fn query_profile_records(&self, _principal_id: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| Ok(self.fallback.lock().unwrap().clone()))
        }
    }

    // -------------------------------------------------------------------------
    // RecordingNavigator
    // -------------------------------------------------------------------------

    #[derive(Default)]
    pub struct RecordingNavigator {
        pub visits: Mutex<Vec<String>>,
    }

    impl RecordingNavigator {
        pub fn visits(&self) -> Vec<String> {
            self.visits.lock().unwrap().clone()
        }
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, path: &str) {
            self.visits.lock().unwrap().push(path.to_owned());
        }
    }
}

#[cfg(test)]
#[path = "provider_test.rs"]
mod tests;
