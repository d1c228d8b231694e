//! Auth orchestrator: sequences session restore, profile loading, and
//! auth-change events over one profile cache.
//!
//! ARCHITECTURE
//! ============
//! `initialize` fetches the session once (with retry), maps the principal,
//! loads profiles only when the cache is empty or stale, then attaches
//! exactly one auth-change listener. The listener task feeds each event into
//! [`AuthOrchestrator::handle_event`], which decides between a forced
//! reload, a staleness-gated reload, a session-only update, or a local
//! sign-out.
//!
//! CONCURRENCY
//! ===========
//! Two latches drop (never queue) overlapping work: one for initialization
//! and one for profile loads. Every state write after an `.await` goes
//! through a disposed check under the state lock, so results that resolve
//! after `dispose` are discarded. Shared state sits behind a
//! `std::sync::Mutex` that is never held across an `.await`.
//!
//! ERROR HANDLING
//! ==============
//! Session fetch failures settle into `Ready { session: None }` with an
//! error message. Profile failures only set the cache's warning; they never
//! clear the principal or the session.

pub mod phase;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{AuthConfig, DEFAULT_LOGIN_PATH, DEFAULT_PROFILE_STALE_MINUTES, DEFAULT_SIGNOUT_REDIRECT_DELAY_MS};
use crate::error::{IdentityError, LogoutError, OAuthInitiationError, ProfileFetchError};
use crate::login::initiate_oauth_login;
use crate::profile::{ProfileCache, ProfileRecord};
use crate::provider::{AuthChange, AuthEventKind, IdentityProvider, Navigator, OAuthRedirect, ProfileStore};
use crate::retry::RetryPolicy;
use crate::session::{Principal, Session, fetch_session_with_retry};
use crate::storage::{IdentityStore, PersistedIdentity};
pub use phase::{AuthPhase, PhaseError, Readiness};

pub const INIT_FAILED_MESSAGE: &str = "authentication initialization failed";

// =============================================================================
// CONFIG AND DEPENDENCIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub session_retry: RetryPolicy,
    pub profile_stale_minutes: u64,
    pub signout_redirect_delay: Duration,
    pub login_path: String,
    pub callback_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_retry: RetryPolicy::default(),
            profile_stale_minutes: DEFAULT_PROFILE_STALE_MINUTES,
            signout_redirect_delay: Duration::from_millis(DEFAULT_SIGNOUT_REDIRECT_DELAY_MS),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            callback_url: "http://localhost:3000/auth/callback".to_owned(),
        }
    }
}

impl From<&AuthConfig> for OrchestratorConfig {
    fn from(cfg: &AuthConfig) -> Self {
        Self {
            session_retry: cfg.session_retry,
            profile_stale_minutes: cfg.profile_stale_minutes,
            signout_redirect_delay: cfg.signout_redirect_delay,
            login_path: cfg.login_path.clone(),
            callback_url: cfg.callback_url(),
        }
    }
}

/// Collaborators handed in by the composition root.
pub struct AuthDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub profiles: Arc<dyn ProfileStore>,
    pub navigator: Arc<dyn Navigator>,
    pub cache: ProfileCache,
    pub identity_store: IdentityStore,
}

// =============================================================================
// OUTCOMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Another initialization was in flight; this request was dropped.
    Skipped,
    NoSession,
    Authenticated,
    /// The session fetch failed after retries.
    Failed,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileLoad {
    Loaded(usize),
    /// The store had no assignments; the session is kept without a profile.
    Empty,
    Failed,
    /// Another load was in flight; this request was dropped.
    Skipped,
    /// The result arrived after disposal or a principal change.
    Discarded,
    NoPrincipal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Ignored,
    SessionUpdated,
    ProfileReloaded(ProfileLoad),
    Cleared { redirect_scheduled: bool },
}

/// Consumer-facing view. Never carries tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthSnapshot {
    pub phase: &'static str,
    pub readiness: Option<Readiness>,
    pub listening: bool,
    pub principal: Option<Principal>,
    pub session_expires_at: Option<i64>,
    pub profiles: Vec<ProfileRecord>,
    pub active_office_id: Option<String>,
    pub has_profile: bool,
    pub profile_error: Option<String>,
    pub error: Option<String>,
    /// Identity persisted by a previous run, available before the session is verified.
    pub remembered: Option<PersistedIdentity>,
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Default)]
struct OrchestratorState {
    phase: AuthPhase,
    principal: Option<Principal>,
    error: Option<String>,
    listener: Option<JoinHandle<()>>,
    remembered: Option<PersistedIdentity>,
}

struct Shared {
    deps: AuthDeps,
    config: OrchestratorConfig,
    state: Mutex<OrchestratorState>,
    initializing: AtomicBool,
    loading_profile: AtomicBool,
    snapshot_tx: watch::Sender<AuthSnapshot>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(listener) = state.listener.take() {
            listener.abort();
        }
    }
}

/// Drop-not-queue latch; released when the guard drops.
struct Latch<'a>(&'a AtomicBool);

impl<'a> Latch<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for Latch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn enter(phase: &mut AuthPhase, next: AuthPhase) {
    if let Err(e) = phase.transition(next) {
        warn!(error = %e, "auth phase transition rejected");
    }
}

fn build_snapshot(state: &OrchestratorState, cache: &ProfileCache, stale_minutes: u64) -> AuthSnapshot {
    let profile = cache.snapshot();
    let stale = cache.is_stale(stale_minutes);
    AuthSnapshot {
        phase: state.phase.name(),
        readiness: state.phase.readiness(stale),
        listening: state.listener.is_some(),
        principal: state.principal.clone(),
        session_expires_at: state.phase.session().map(|s| s.expires_at),
        profiles: profile.records,
        active_office_id: profile.active_office_id,
        has_profile: profile.has_profile,
        profile_error: profile.error,
        error: state.error.clone(),
        remembered: state.remembered.clone(),
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Cheap-to-clone handle; all clones drive the same state.
#[derive(Clone)]
pub struct AuthOrchestrator {
    shared: Arc<Shared>,
}

impl AuthOrchestrator {
    #[must_use]
    pub fn new(deps: AuthDeps, config: OrchestratorConfig) -> Self {
        let state = OrchestratorState { remembered: deps.identity_store.load(), ..OrchestratorState::default() };
        let (snapshot_tx, _) = watch::channel(build_snapshot(&state, &deps.cache, config.profile_stale_minutes));
        Self {
            shared: Arc::new(Shared {
                deps,
                config,
                state: Mutex::new(state),
                initializing: AtomicBool::new(false),
                loading_profile: AtomicBool::new(false),
                snapshot_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let snapshot = {
            let state = self.lock();
            build_snapshot(&state, &self.shared.deps.cache, self.shared.config.profile_stale_minutes)
        };
        self.shared.snapshot_tx.send_replace(snapshot);
    }

    /// Apply `f` unless disposed; `None` when the write was suppressed.
    fn write_live<R>(&self, f: impl FnOnce(&mut OrchestratorState) -> R) -> Option<R> {
        let out = {
            let mut state = self.lock();
            if state.phase.is_disposed() {
                return None;
            }
            f(&mut state)
        };
        self.publish();
        Some(out)
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.lock().phase.is_disposed()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.lock().listener.is_some()
    }

    #[must_use]
    pub fn principal(&self) -> Option<Principal> {
        self.lock().principal.clone()
    }

    fn principal_id(&self) -> Option<String> {
        self.lock().principal.as_ref().map(|p| p.id.clone())
    }

    #[must_use]
    pub fn cache(&self) -> &ProfileCache {
        &self.shared.deps.cache
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        let state = self.lock();
        build_snapshot(&state, &self.shared.deps.cache, self.shared.config.profile_stale_minutes)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    fn profile_needs_reload(&self) -> bool {
        let cache = &self.shared.deps.cache;
        cache.is_empty() || cache.is_stale(self.shared.config.profile_stale_minutes)
    }

    // -------------------------------------------------------------------------
    // Initialization
    // -------------------------------------------------------------------------

    /// Restore the session, load profiles if needed, and attach the listener.
    ///
    /// A call made while another initialization is in flight is dropped.
    pub async fn initialize(&self) -> InitOutcome {
        let Some(_latch) = Latch::acquire(&self.shared.initializing) else {
            debug!("auth initialization already in flight; dropping request");
            return InitOutcome::Skipped;
        };
        match self.write_live(|st| st.phase.transition(AuthPhase::Initializing)) {
            None | Some(Err(PhaseError::Disposed)) => return InitOutcome::Disposed,
            Some(Err(e)) => {
                warn!(error = %e, "auth initialization rejected");
                return InitOutcome::Skipped;
            }
            Some(Ok(())) => {}
        }
        info!("auth initialization started");

        let identity = self.shared.deps.identity.as_ref();
        let fetched = fetch_session_with_retry(identity, self.shared.config.session_retry).await;

        let outcome = match fetched {
            Err(e) => {
                error!(error = %e, "session fetch failed during initialization");
                let written = self.write_live(|st| {
                    st.principal = None;
                    st.error = Some(INIT_FAILED_MESSAGE.to_owned());
                    self.shared.deps.cache.clear();
                    enter(&mut st.phase, AuthPhase::Ready { session: None });
                });
                if written.is_none() {
                    debug!("disposed during session fetch; discarding failure");
                    return InitOutcome::Disposed;
                }
                self.shared.deps.navigator.navigate(&self.shared.config.login_path);
                InitOutcome::Failed
            }
            Ok(None) => {
                let written = self.write_live(|st| {
                    st.principal = None;
                    st.error = None;
                    self.shared.deps.cache.clear();
                    enter(&mut st.phase, AuthPhase::Ready { session: None });
                });
                if written.is_none() {
                    return InitOutcome::Disposed;
                }
                info!("no usable session");
                InitOutcome::NoSession
            }
            Ok(Some(session)) => {
                let Some(principal) = self.adopt_session(session, true) else {
                    debug!("disposed during session fetch; discarding session");
                    return InitOutcome::Disposed;
                };
                info!(user_id = %principal.id, "session restored");
                if self.profile_needs_reload() {
                    self.load_profile().await;
                } else {
                    debug!(user_id = %principal.id, "profile cache fresh; skipping fetch");
                }
                InitOutcome::Authenticated
            }
        };

        if self.is_disposed() {
            return InitOutcome::Disposed;
        }
        self.attach_listener();
        outcome
    }

    /// Subscribe to auth-change events once. Returns `false` if a listener
    /// already exists or the orchestrator is disposed.
    pub fn attach_listener(&self) -> bool {
        {
            let mut state = self.lock();
            if state.phase.is_disposed() || state.listener.is_some() {
                return false;
            }
            let mut events = self.shared.deps.identity.on_auth_state_change();
            let weak = Arc::downgrade(&self.shared);
            let listener = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(change) => {
                            let Some(shared) = weak.upgrade() else {
                                break;
                            };
                            AuthOrchestrator { shared }.handle_event(change).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "auth event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                debug!("auth event listener stopped");
            });
            state.listener = Some(listener);
        }
        info!("auth event listener attached");
        self.publish();
        true
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// React to one auth-change event.
    pub async fn handle_event(&self, change: AuthChange) -> EventAction {
        if self.is_disposed() {
            return EventAction::Ignored;
        }
        let AuthChange { kind, session } = change;
        debug!(?kind, has_session = session.is_some(), "auth event received");

        let session = match session.filter(|s| !s.access_token.is_empty()) {
            Some(session) if kind != AuthEventKind::SignedOut => session,
            _ => {
                let redirect = kind == AuthEventKind::SignedOut;
                self.clear_local_session();
                if redirect {
                    self.schedule_login_redirect();
                }
                info!(?kind, redirect, "session ended");
                return EventAction::Cleared { redirect_scheduled: redirect };
            }
        };

        match kind {
            AuthEventKind::SignedIn => {
                if self.adopt_session(session, true).is_none() {
                    return EventAction::Ignored;
                }
                EventAction::ProfileReloaded(self.load_profile().await)
            }
            AuthEventKind::InitialSession => {
                if self.adopt_session(session, false).is_none() {
                    return EventAction::Ignored;
                }
                if self.profile_needs_reload() {
                    EventAction::ProfileReloaded(self.load_profile().await)
                } else {
                    debug!("profile cache fresh; initial session needs no fetch");
                    EventAction::SessionUpdated
                }
            }
            AuthEventKind::TokenRefreshed => {
                if self.adopt_session(session, false).is_none() {
                    return EventAction::Ignored;
                }
                EventAction::SessionUpdated
            }
            // UserUpdated, PasswordRecovery
            _ => {
                if self.adopt_session(session, true).is_none() {
                    return EventAction::Ignored;
                }
                EventAction::SessionUpdated
            }
        }
    }

    /// Store `session` and, when asked (or when the user changed), remap the
    /// principal. A different user invalidates the cached profile.
    fn adopt_session(&self, session: Session, remap_principal: bool) -> Option<Principal> {
        let mapped = Principal::from_user(&session.user);
        let adopted = self.write_live(|st| {
            if let Err(e) = st.phase.transition(AuthPhase::Ready { session: Some(session) }) {
                warn!(user_id = %mapped.id, error = %e, "session rejected; state unchanged");
                return None;
            }
            let previous = st.principal.as_ref().map(|p| p.id.clone());
            let user_changed = previous.as_deref() != Some(mapped.id.as_str());
            let remapped = remap_principal || user_changed;
            if remapped {
                if previous.is_some() && user_changed {
                    debug!(user_id = %mapped.id, "principal changed; dropping cached profile");
                    self.shared.deps.cache.clear();
                }
                st.principal = Some(mapped.clone());
            }
            Some((st.principal.clone(), remapped))
        });
        let (principal, remapped) = adopted.flatten()?;
        if remapped {
            self.shared.deps.identity_store.save(&mapped);
        }
        principal
    }

    fn clear_local_session(&self) {
        let cleared = self.write_live(|st| {
            st.principal = None;
            self.shared.deps.cache.clear();
            if matches!(st.phase, AuthPhase::Initializing | AuthPhase::Ready { .. }) {
                enter(&mut st.phase, AuthPhase::Ready { session: None });
            }
        });
        if cleared.is_some() {
            self.shared.deps.identity_store.clear();
        }
    }

    fn schedule_login_redirect(&self) {
        let weak = Arc::downgrade(&self.shared);
        let delay = self.shared.config.signout_redirect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let orchestrator = AuthOrchestrator { shared };
            if orchestrator.is_disposed() || orchestrator.principal_id().is_some() {
                debug!("login redirect cancelled");
                return;
            }
            let shared = &orchestrator.shared;
            shared.deps.navigator.navigate(&shared.config.login_path);
        });
    }

    // -------------------------------------------------------------------------
    // Profiles
    // -------------------------------------------------------------------------

    /// Load the principal's profile records into the cache.
    ///
    /// Dropped if a load is already in flight. The result is discarded if the
    /// orchestrator was disposed or the principal changed while it was pending.
    pub async fn load_profile(&self) -> ProfileLoad {
        if self.is_disposed() {
            return ProfileLoad::Discarded;
        }
        let Some(principal_id) = self.principal_id() else {
            return ProfileLoad::NoPrincipal;
        };
        let Some(_latch) = Latch::acquire(&self.shared.loading_profile) else {
            debug!(user_id = %principal_id, "profile load already in flight; dropping request");
            return ProfileLoad::Skipped;
        };

        let result = self.fetch_profiles(&principal_id).await;

        let outcome = {
            let state = self.lock();
            if state.phase.is_disposed() {
                debug!(user_id = %principal_id, "disposed during profile fetch; discarding result");
                return ProfileLoad::Discarded;
            }
            if state.principal.as_ref().map(|p| p.id.as_str()) != Some(principal_id.as_str()) {
                debug!(user_id = %principal_id, "principal changed during profile fetch; discarding result");
                return ProfileLoad::Discarded;
            }
            let cache = &self.shared.deps.cache;
            match result {
                Ok(records) if records.is_empty() => {
                    warn!(user_id = %principal_id, "no office assignments; keeping session without profile");
                    cache.clear();
                    ProfileLoad::Empty
                }
                Ok(records) => {
                    let count = records.len();
                    cache.set_profiles(records);
                    info!(user_id = %principal_id, count, "profile loaded");
                    ProfileLoad::Loaded(count)
                }
                Err(e) => {
                    warn!(user_id = %principal_id, error = %e, "profile fetch failed; session kept");
                    cache.set_error(e.to_string());
                    ProfileLoad::Failed
                }
            }
        };
        self.publish();
        outcome
    }

    /// Query profiles; on an auth-flavored failure refresh the session once
    /// and retry once.
    async fn fetch_profiles(&self, principal_id: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError> {
        let profiles = self.shared.deps.profiles.as_ref();
        match profiles.query_profile_records(principal_id).await {
            Err(e) if e.is_auth() => {
                warn!(error = %e, "profile query rejected credential; refreshing session");
                match self.shared.deps.identity.refresh_session().await {
                    Ok(Some(session)) => {
                        self.write_live(|st| enter(&mut st.phase, AuthPhase::Ready { session: Some(session) }));
                    }
                    Ok(None) => {
                        warn!("session refresh returned no session");
                        return Err(e);
                    }
                    Err(refresh_err) => {
                        warn!(error = %refresh_err, "session refresh failed");
                        return Err(e);
                    }
                }
                profiles.query_profile_records(principal_id).await
            }
            other => other,
        }
    }

    /// Force a profile reload regardless of staleness.
    pub async fn refresh_profile(&self) -> ProfileLoad {
        self.load_profile().await
    }

    /// Re-point the active office among loaded records. Never fetches.
    pub fn switch_active_office(&self, office_id: &str) -> bool {
        if self.is_disposed() {
            return false;
        }
        let switched = self.shared.deps.cache.switch_active_office(office_id);
        self.publish();
        switched
    }

    // -------------------------------------------------------------------------
    // Sign-in / sign-out
    // -------------------------------------------------------------------------

    /// Start an OAuth sign-in that returns to the configured callback URL,
    /// carrying `oauth_state` back as a query parameter when given.
    ///
    /// # Errors
    ///
    /// Returns [`OAuthInitiationError`] if the provider could not start the redirect.
    pub async fn sign_in_with_oauth(
        &self,
        provider: &str,
        oauth_state: Option<&str>,
    ) -> Result<OAuthRedirect, OAuthInitiationError> {
        let callback = &self.shared.config.callback_url;
        let redirect_to = match oauth_state {
            Some(state) => format!("{callback}?state={state}"),
            None => callback.clone(),
        };
        initiate_oauth_login(self.shared.deps.identity.as_ref(), provider, &redirect_to).await
    }

    /// Exchange the OAuth callback code. The resulting `SignedIn` event drives
    /// the profile reload; without a listener it is applied directly.
    ///
    /// # Errors
    ///
    /// Returns the provider error if the exchange failed.
    pub async fn complete_oauth(&self, code: &str) -> Result<(), IdentityError> {
        let session = self.shared.deps.identity.exchange_code(code).await?;
        info!(user_id = %session.user.id, "oauth code exchanged");
        if !self.is_listening() {
            self.handle_event(AuthChange::new(AuthEventKind::SignedIn, Some(session))).await;
        }
        Ok(())
    }

    /// Sign out at the provider, then clear local state.
    ///
    /// # Errors
    ///
    /// Returns [`LogoutError`] and leaves local state untouched if the
    /// provider call failed.
    pub async fn sign_out(&self) -> Result<(), LogoutError> {
        if let Err(e) = self.shared.deps.identity.sign_out().await {
            warn!(error = %e, "sign-out failed; local session kept");
            return Err(LogoutError(e));
        }
        info!("signed out");
        self.clear_local_session();
        if !self.is_listening() {
            self.schedule_login_redirect();
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Teardown
    // -------------------------------------------------------------------------

    /// Unsubscribe and stop honoring async results. Idempotent.
    pub fn dispose(&self) {
        let listener = {
            let mut state = self.lock();
            if state.phase.is_disposed() {
                return;
            }
            enter(&mut state.phase, AuthPhase::Disposed);
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener.abort();
        }
        self.publish();
        info!("auth orchestrator disposed");
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
