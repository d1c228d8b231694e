//! Auth routes: OAuth round trip, state polling, logout, office switch.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::ErrorCode;
use crate::orchestrator::AuthSnapshot;
use crate::state::AppState;
use crate::supabase::pkce;

const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";
const DEFAULT_PROVIDER: &str = "google";

fn state_cookie(value: String, secure: bool, max_age: Duration) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE_NAME, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    (status, Json(serde_json::json!({ "code": code, "error": message }))).into_response()
}

// =============================================================================
// OAUTH
// =============================================================================

#[derive(Deserialize)]
pub struct LoginQuery {
    provider: Option<String>,
}

/// `GET /auth/login?provider=`: redirect to the identity provider.
pub async fn login(State(state): State<AppState>, Query(params): Query<LoginQuery>) -> Response {
    let provider = params.provider.as_deref().unwrap_or(DEFAULT_PROVIDER);
    let oauth_state = pkce::generate_state();

    match state
        .orchestrator
        .sign_in_with_oauth(provider, Some(&oauth_state))
        .await
    {
        Ok(redirect) => {
            let jar = CookieJar::new().add(state_cookie(oauth_state, state.config.cookie_secure, Duration::minutes(10)));
            (jar, Redirect::temporary(&redirect.url)).into_response()
        }
        Err(e) => error_body(StatusCode::BAD_GATEWAY, e.error_code(), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error_description: Option<String>,
}

/// `GET /auth/callback`: verify CSRF state, exchange the code, redirect to `/`.
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackQuery>,
) -> Response {
    if let Some(description) = params.error_description.as_deref() {
        tracing::warn!(error = %description, "provider returned an oauth error");
        return Redirect::temporary(&state.config.login_path).into_response();
    }

    let Some(callback_state) = params.state.as_deref() else {
        return (StatusCode::BAD_REQUEST, "missing oauth state").into_response();
    };
    let expected_state = jar
        .get(OAUTH_STATE_COOKIE_NAME)
        .map(Cookie::value)
        .unwrap_or_default();
    if expected_state.is_empty() || expected_state != callback_state {
        return (StatusCode::UNAUTHORIZED, "invalid oauth state").into_response();
    }
    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing code").into_response();
    };

    if let Err(e) = state.orchestrator.complete_oauth(code).await {
        tracing::error!(error = %e, "oauth code exchange failed");
        return error_body(StatusCode::BAD_GATEWAY, e.error_code(), "OAuth code exchange failed".into());
    }

    let jar = jar.add(state_cookie(String::new(), state.config.cookie_secure, Duration::ZERO));
    (jar, Redirect::temporary("/")).into_response()
}

// =============================================================================
// STATE / MUTATIONS
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AuthStateResponse {
    #[serde(flatten)]
    pub snapshot: AuthSnapshot,
    /// Where the browser should go next, if a redirect was scheduled.
    pub redirect_to: Option<String>,
}

/// `GET /api/auth/state`: current snapshot plus any parked redirect.
pub async fn state(State(state): State<AppState>) -> Json<AuthStateResponse> {
    Json(AuthStateResponse { snapshot: state.orchestrator.snapshot(), redirect_to: state.redirects.take() })
}

/// `POST /api/auth/logout`
pub async fn logout(State(state): State<AppState>) -> Response {
    match state.orchestrator.sign_out().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_body(StatusCode::BAD_GATEWAY, e.error_code(), e.to_string()),
    }
}

#[derive(Deserialize)]
pub struct SwitchOfficeBody {
    office_id: String,
}

/// `POST /api/auth/office`: re-point the active office. Never fetches.
pub async fn switch_office(State(state): State<AppState>, Json(body): Json<SwitchOfficeBody>) -> Response {
    if state.orchestrator.switch_active_office(&body.office_id) {
        Json(state.orchestrator.snapshot()).into_response()
    } else {
        error_body(
            StatusCode::NOT_FOUND,
            "E_OFFICE_NOT_ASSIGNED",
            format!("office {} is not assigned to this user", body.office_id),
        )
    }
}

/// `POST /api/auth/profile/refresh`: reload profiles in the background.
pub async fn refresh_profile(State(state): State<AppState>) -> StatusCode {
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.refresh_profile().await;
        tracing::debug!(?outcome, "manual profile refresh finished");
    });
    StatusCode::ACCEPTED
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
