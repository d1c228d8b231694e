use std::collections::HashMap;

use axum::Router;
use axum::extract::{Json, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;

use super::*;
use crate::provider::test_helpers::sample_session;

fn token_body(access: &str, user_id: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": format!("rt-{access}"),
        "user": {
            "id": user_id,
            "email": format!("{user_id}@office.test"),
            "user_metadata": { "full_name": "Dana Office" },
            "app_metadata": { "role": "manager" }
        }
    })
}

async fn spawn_gotrue(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base_url: &str) -> SupabaseAuth {
    SupabaseAuth::with_client(reqwest::Client::new(), base_url, "anon-key", 60)
}

// =============================================================================
// parse_token_response
// =============================================================================

#[test]
fn token_response_uses_expires_in() {
    let body = token_body("at-1", "u1").to_string();
    let session = parse_token_response(&body, 1_000).unwrap();
    assert_eq!(session.access_token, "at-1");
    assert_eq!(session.refresh_token.as_deref(), Some("rt-at-1"));
    assert_eq!(session.expires_at, 4_600);
    assert_eq!(session.user.id, "u1");
}

#[test]
fn token_response_saturates_huge_expires_in() {
    let mut body = token_body("at-1", "u1");
    body["expires_in"] = serde_json::json!(i64::MAX);
    let session = parse_token_response(&body.to_string(), 1_000).unwrap();
    assert_eq!(session.expires_at, i64::MAX);
}

#[test]
fn token_response_prefers_expires_at() {
    let mut body = token_body("at-1", "u1");
    body["expires_at"] = serde_json::json!(9_999);
    let session = parse_token_response(&body.to_string(), 1_000).unwrap();
    assert_eq!(session.expires_at, 9_999);
}

#[test]
fn token_response_rejects_missing_user() {
    let err = parse_token_response(r#"{"access_token":"x"}"#, 0).unwrap_err();
    assert!(matches!(err, IdentityError::Decode(_)));
}

// =============================================================================
// authorize_url
// =============================================================================

#[test]
fn authorize_url_encodes_params() {
    let url = authorize_url("https://proj.supabase.co", "google", "http://localhost:3000/auth/callback?state=a b", "chal")
        .unwrap();
    assert!(url.starts_with("https://proj.supabase.co/auth/v1/authorize?provider=google"));
    assert!(url.contains("redirect_to=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback%3Fstate%3Da+b"));
    assert!(url.contains("code_challenge=chal"));
    assert!(url.contains("code_challenge_method=s256"));
}

#[test]
fn authorize_url_rejects_bad_base() {
    assert!(authorize_url("not a url", "google", "/cb", "c").is_err());
}

// =============================================================================
// local behavior (no network)
// =============================================================================

#[tokio::test]
async fn get_session_without_session_is_none() {
    let auth = client("http://127.0.0.1:9");
    assert!(auth.get_session().await.unwrap().is_none());
    assert!(auth.access_token().is_none());
}

#[tokio::test]
async fn get_session_returns_fresh_session_untouched() {
    let auth = client("http://127.0.0.1:9");
    let session = sample_session("u1", 3600);
    auth.set_session(Some(session.clone()));
    assert_eq!(auth.get_session().await.unwrap(), Some(session.clone()));
    assert_eq!(auth.access_token(), Some(session.access_token));
}

#[tokio::test]
async fn exchange_without_verifier_fails() {
    let auth = client("http://127.0.0.1:9");
    assert_eq!(auth.exchange_code("abc").await.unwrap_err(), IdentityError::MissingVerifier);
}

#[tokio::test]
async fn sign_in_builds_pkce_redirect() {
    let auth = client("https://proj.supabase.co");
    let redirect = auth.sign_in_with_oauth("github", "http://localhost:3000/auth/callback").await.unwrap();
    assert_eq!(redirect.provider, "github");
    assert!(redirect.url.contains("provider=github"));
    assert!(redirect.url.contains("code_challenge_method=s256"));
    assert!(auth.take_verifier().is_some());
}

#[tokio::test]
async fn sign_out_without_session_emits_signed_out() {
    let auth = client("http://127.0.0.1:9");
    let mut rx = auth.events.subscribe();
    auth.sign_out().await.unwrap();
    let change = rx.recv().await.unwrap();
    assert_eq!(change.kind, AuthEventKind::SignedOut);
    assert!(change.session.is_none());
}

#[tokio::test]
async fn subscribing_replays_initial_session() {
    let auth = client("http://127.0.0.1:9");
    auth.set_session(Some(sample_session("u1", 3600)));
    let mut rx = auth.on_auth_state_change();
    let change = rx.recv().await.unwrap();
    assert_eq!(change.kind, AuthEventKind::InitialSession);
    assert_eq!(change.session.map(|s| s.user.id), Some("u1".to_owned()));
}

#[tokio::test]
async fn expired_session_is_not_replayed() {
    let auth = client("http://127.0.0.1:9");
    auth.set_session(Some(sample_session("u1", -30)));
    let mut rx = auth.on_auth_state_change();
    assert!(rx.recv().await.unwrap().session.is_none());
}

// =============================================================================
// against a local GoTrue stand-in
// =============================================================================

async fn token_handler(Query(q): Query<HashMap<String, String>>, headers: HeaderMap, Json(body): Json<serde_json::Value>) -> axum::response::Response {
    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some("anon-key") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match q.get("grant_type").map(String::as_str) {
        Some("pkce") if body["auth_code"] == "good-code" && body["code_verifier"].is_string() => {
            Json(token_body("at-pkce", "u1")).into_response()
        }
        Some("refresh_token") if body["refresh_token"] == "rt-live" => Json(token_body("at-refreshed", "u1")).into_response(),
        _ => (StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#).into_response(),
    }
}

#[tokio::test]
async fn exchange_code_stores_session_and_signs_in() {
    let base = spawn_gotrue(Router::new().route("/auth/v1/token", post(token_handler))).await;
    let auth = client(&base);
    let mut rx = auth.events.subscribe();
    auth.sign_in_with_oauth("google", "http://localhost:3000/auth/callback").await.unwrap();

    let session = auth.exchange_code("good-code").await.unwrap();

    assert_eq!(session.access_token, "at-pkce");
    assert_eq!(auth.access_token().as_deref(), Some("at-pkce"));
    assert_eq!(rx.recv().await.unwrap().kind, AuthEventKind::SignedIn);
    // The verifier is single-use.
    assert_eq!(auth.exchange_code("good-code").await.unwrap_err(), IdentityError::MissingVerifier);
}

#[tokio::test]
async fn near_expiry_session_is_refreshed() {
    let base = spawn_gotrue(Router::new().route("/auth/v1/token", post(token_handler))).await;
    let auth = client(&base);
    let mut expiring = sample_session("u1", 30);
    expiring.refresh_token = Some("rt-live".into());
    auth.set_session(Some(expiring));
    let mut rx = auth.events.subscribe();

    let session = auth.get_session().await.unwrap().unwrap();

    assert_eq!(session.access_token, "at-refreshed");
    assert_eq!(rx.recv().await.unwrap().kind, AuthEventKind::TokenRefreshed);
}

#[tokio::test]
async fn rejected_refresh_token_ends_session() {
    let base = spawn_gotrue(Router::new().route("/auth/v1/token", post(token_handler))).await;
    let auth = client(&base);
    let mut stale = sample_session("u1", 3600);
    stale.refresh_token = Some("rt-revoked".into());
    auth.set_session(Some(stale));
    let mut rx = auth.events.subscribe();

    assert!(auth.refresh_session().await.unwrap().is_none());

    assert!(auth.access_token().is_none());
    assert_eq!(rx.recv().await.unwrap().kind, AuthEventKind::SignedOut);
}

#[tokio::test]
async fn logout_failure_keeps_session() {
    let router = Router::new().route(
        "/auth/v1/logout",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
    );
    let base = spawn_gotrue(router).await;
    let auth = client(&base);
    auth.set_session(Some(sample_session("u1", 3600)));

    let err = auth.sign_out().await.unwrap_err();

    assert_eq!(err, IdentityError::Api { status: 503, body: "down".into() });
    assert!(auth.access_token().is_some());
}

#[tokio::test]
async fn logout_of_revoked_session_succeeds() {
    let router = Router::new().route("/auth/v1/logout", post(|| async { StatusCode::UNAUTHORIZED }));
    let base = spawn_gotrue(router).await;
    let auth = client(&base);
    auth.set_session(Some(sample_session("u1", 3600)));

    auth.sign_out().await.unwrap();

    assert!(auth.access_token().is_none());
}
