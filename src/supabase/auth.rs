//! GoTrue client: session holder, refresh grant, PKCE OAuth, sign-out.
//!
//! DESIGN
//! ======
//! The adapter owns the single in-process session. `get_session` hands it
//! back as-is unless it expires within the refresh margin, in which case the
//! refresh grant runs first. Every session change is broadcast on the event
//! bus so the orchestrator hears about it the same way it would hear about a
//! change made in another tab.
//!
//! Pure parsing in `parse_token_response` and URL construction in
//! `authorize_url` for testability.

use std::sync::{Mutex, PoisonError, RwLock};

use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{AccessTokenSource, pkce};
use crate::config::AuthConfig;
use crate::error::IdentityError;
use crate::provider::{AuthChange, AuthEventBus, AuthEventKind, IdentityProvider, OAuthRedirect};
use crate::session::{ExternalUser, Session, now_epoch_secs};

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

// =============================================================================
// CLIENT
// =============================================================================

pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    refresh_margin_secs: i64,
    session: RwLock<Option<Session>>,
    pending_verifier: Mutex<Option<String>>,
    events: AuthEventBus,
}

impl SupabaseAuth {
    #[must_use]
    pub fn new(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self::with_client(http, &config.supabase_url, &config.supabase_anon_key, config.session_refresh_margin_secs)
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, base_url: &str, anon_key: &str, refresh_margin_secs: i64) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            anon_key: anon_key.to_owned(),
            refresh_margin_secs,
            session: RwLock::new(None),
            pending_verifier: Mutex::new(None),
            events: AuthEventBus::new(),
        }
    }

    /// Replace the held session without emitting an event.
    pub fn set_session(&self, session: Option<Session>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn current(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn take_verifier(&self) -> Option<String> {
        self.pending_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> Result<Session, IdentityError> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let text = read_body(response).await?;
        parse_token_response(&text, now_epoch_secs())
    }

    /// Drop the held session and tell listeners it is gone.
    fn end_session(&self) {
        self.set_session(None);
        self.events.emit(AuthChange::new(AuthEventKind::SignedOut, None));
    }
}

impl AccessTokenSource for SupabaseAuth {
    fn access_token(&self) -> Option<String> {
        self.current().map(|s| s.access_token)
    }
}

// =============================================================================
// IDENTITY PROVIDER
// =============================================================================

#[async_trait::async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn get_session(&self) -> Result<Option<Session>, IdentityError> {
        match self.current() {
            Some(session)
                if session.refresh_token.is_some()
                    && session.expires_within(self.refresh_margin_secs, now_epoch_secs()) =>
            {
                debug!(expires_at = session.expires_at, "session near expiry; refreshing");
                self.refresh_session().await
            }
            other => Ok(other),
        }
    }

    async fn get_user(&self) -> Result<ExternalUser, IdentityError> {
        let Some(session) = self.current() else {
            return Err(IdentityError::NoSession);
        };
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(transport)?;
        let text = read_body(response).await?;
        let user: ExternalUser = serde_json::from_str(&text).map_err(|e| IdentityError::Decode(e.to_string()))?;

        if user != session.user {
            let updated = Session { user: user.clone(), ..session };
            self.set_session(Some(updated.clone()));
            self.events.emit(AuthChange::new(AuthEventKind::UserUpdated, Some(updated)));
        }
        Ok(user)
    }

    async fn refresh_session(&self) -> Result<Option<Session>, IdentityError> {
        let Some(refresh_token) = self.current().and_then(|s| s.refresh_token) else {
            return Ok(None);
        };
        match self
            .token_grant("refresh_token", serde_json::json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(session) => {
                info!(user_id = %session.user.id, expires_at = session.expires_at, "session refreshed");
                self.set_session(Some(session.clone()));
                self.events.emit(AuthChange::new(AuthEventKind::TokenRefreshed, Some(session.clone())));
                Ok(Some(session))
            }
            Err(IdentityError::Api { status: status @ (400 | 401), body }) => {
                warn!(status, body = %body, "refresh token rejected; ending session");
                self.end_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> Result<OAuthRedirect, IdentityError> {
        let verifier = pkce::generate_code_verifier();
        let url = authorize_url(&self.base_url, provider, redirect_to, &pkce::code_challenge(&verifier))?;
        *self
            .pending_verifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(verifier);
        Ok(OAuthRedirect { provider: provider.to_owned(), url })
    }

    async fn exchange_code(&self, code: &str) -> Result<Session, IdentityError> {
        let Some(verifier) = self.take_verifier() else {
            return Err(IdentityError::MissingVerifier);
        };
        let session = self
            .token_grant("pkce", serde_json::json!({ "auth_code": code, "code_verifier": verifier }))
            .await?;
        info!(user_id = %session.user.id, "oauth session established");
        self.set_session(Some(session.clone()));
        self.events.emit(AuthChange::new(AuthEventKind::SignedIn, Some(session.clone())));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        if let Some(session) = self.current() {
            let response = self
                .http
                .post(self.endpoint("logout"))
                .header("apikey", &self.anon_key)
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(transport)?;
            match read_body(response).await {
                // Already revoked server-side.
                Ok(_) | Err(IdentityError::Api { status: 401 | 403 | 404, .. }) => {}
                Err(e) => return Err(e),
            }
        }
        info!("provider session ended");
        self.end_session();
        Ok(())
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChange> {
        let rx = self.events.subscribe();
        let initial = self.current().filter(Session::is_usable);
        self.events.emit(AuthChange::new(AuthEventKind::InitialSession, initial));
        rx
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: ExternalUser,
}

// =============================================================================
// PARSING
// =============================================================================

fn transport(e: reqwest::Error) -> IdentityError {
    IdentityError::Transport(e.to_string())
}

async fn read_body(response: reqwest::Response) -> Result<String, IdentityError> {
    let status = response.status().as_u16();
    let text = response.text().await.map_err(transport)?;
    if !(200..300).contains(&status) {
        return Err(IdentityError::Api { status, body: text });
    }
    Ok(text)
}

/// Parse a GoTrue token response. `expires_at` wins over `expires_in`.
pub(crate) fn parse_token_response(body: &str, now_secs: i64) -> Result<Session, IdentityError> {
    let token: TokenResponse = serde_json::from_str(body).map_err(|e| IdentityError::Decode(e.to_string()))?;
    let expires_at = token
        .expires_at
        .unwrap_or_else(|| now_secs.saturating_add(token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)));
    Ok(Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
        expires_at,
        user: token.user,
    })
}

pub(crate) fn authorize_url(
    base_url: &str,
    provider: &str,
    redirect_to: &str,
    challenge: &str,
) -> Result<String, IdentityError> {
    reqwest::Url::parse_with_params(
        &format!("{base_url}/auth/v1/authorize"),
        &[
            ("provider", provider),
            ("redirect_to", redirect_to),
            ("code_challenge", challenge),
            ("code_challenge_method", "s256"),
        ],
    )
    .map(String::from)
    .map_err(|e| IdentityError::Decode(format!("invalid authorize url: {e}")))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
