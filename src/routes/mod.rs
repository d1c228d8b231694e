//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The browser-facing half of the auth flow: the OAuth round trip, a state
//! endpoint the front end polls, and the few mutations it can request.

pub mod auth;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let callback_path = state.config.callback_path.clone();

    Router::new()
        .route("/auth/login", get(auth::login))
        .route(&callback_path, get(auth::callback))
        .route("/api/auth/state", get(auth::state))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/office", post(auth::switch_office))
        .route("/api/auth/profile/refresh", post(auth::refresh_profile))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
