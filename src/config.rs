//! Runtime configuration parsed from environment variables.
//!
//! Retry counts, delays, and the staleness threshold live here in one place
//! instead of being repeated at each call site.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::{DEFAULT_DELAY_MS, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

pub const DEFAULT_SITE_URL: &str = "http://localhost:3000";
pub const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_PROFILE_STALE_MINUTES: u64 = 30;
pub const DEFAULT_SIGNOUT_REDIRECT_DELAY_MS: u64 = 100;
pub const DEFAULT_SESSION_REFRESH_MARGIN_SECS: i64 = 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_PORT: u16 = 3000;

/// Backend used for profile record queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStoreKind {
    /// Supabase REST (PostgREST) with the session's bearer token.
    Postgrest,
    /// Direct Postgres connection through `DATABASE_URL`.
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub site_url: String,
    pub callback_path: String,
    pub login_path: String,
    pub session_retry: RetryPolicy,
    pub profile_stale_minutes: u64,
    pub signout_redirect_delay: Duration,
    pub session_refresh_margin_secs: i64,
    pub http_timeout: Duration,
    pub profile_store: ProfileStoreKind,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub storage_path: Option<PathBuf>,
    pub port: u16,
    pub cookie_secure: bool,
}

impl AuthConfig {
    /// Config with defaults for everything but the provider endpoints.
    #[must_use]
    pub fn new(supabase_url: impl Into<String>, supabase_anon_key: impl Into<String>) -> Self {
        Self {
            supabase_url: supabase_url.into().trim_end_matches('/').to_owned(),
            supabase_anon_key: supabase_anon_key.into(),
            site_url: DEFAULT_SITE_URL.to_owned(),
            callback_path: DEFAULT_CALLBACK_PATH.to_owned(),
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            session_retry: RetryPolicy::default(),
            profile_stale_minutes: DEFAULT_PROFILE_STALE_MINUTES,
            signout_redirect_delay: Duration::from_millis(DEFAULT_SIGNOUT_REDIRECT_DELAY_MS),
            session_refresh_margin_secs: DEFAULT_SESSION_REFRESH_MARGIN_SECS,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            profile_store: ProfileStoreKind::Postgrest,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            storage_path: None,
            port: DEFAULT_PORT,
            cookie_secure: false,
        }
    }

    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `SUPABASE_URL`, `SUPABASE_ANON_KEY`
    /// - `DATABASE_URL` when `PROFILE_STORE=postgres`
    ///
    /// Optional:
    /// - `SITE_URL`, `AUTH_CALLBACK_PATH`, `LOGIN_PATH`
    /// - `SESSION_RETRY_ATTEMPTS` (3), `SESSION_RETRY_DELAY_MS` (1000)
    /// - `PROFILE_STALE_MINUTES` (30), `SIGNOUT_REDIRECT_DELAY_MS` (100)
    /// - `SESSION_REFRESH_MARGIN_SECS` (60), `HTTP_TIMEOUT_SECS` (30)
    /// - `PROFILE_STORE`: `postgrest` (default) or `postgres`
    /// - `DB_MAX_CONNECTIONS` (5), `STORAGE_PATH`, `PORT` (3000), `COOKIE_SECURE`
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, `PROFILE_STORE`
    /// names an unknown backend, or `AUTH_CALLBACK_PATH` is not absolute.
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase_url = require("SUPABASE_URL")?;
        let anon_key = require("SUPABASE_ANON_KEY")?;
        let mut cfg = Self::new(supabase_url, anon_key);

        cfg.site_url = std::env::var("SITE_URL")
            .unwrap_or_else(|_| DEFAULT_SITE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        cfg.callback_path = std::env::var("AUTH_CALLBACK_PATH").unwrap_or_else(|_| DEFAULT_CALLBACK_PATH.to_owned());
        if !cfg.callback_path.starts_with('/') {
            return Err(ConfigError::Invalid { var: "AUTH_CALLBACK_PATH", value: cfg.callback_path });
        }
        cfg.login_path = std::env::var("LOGIN_PATH").unwrap_or_else(|_| DEFAULT_LOGIN_PATH.to_owned());
        cfg.session_retry = RetryPolicy::new(
            env_parse("SESSION_RETRY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            Duration::from_millis(env_parse("SESSION_RETRY_DELAY_MS", DEFAULT_DELAY_MS)),
        );
        cfg.profile_stale_minutes = env_parse("PROFILE_STALE_MINUTES", DEFAULT_PROFILE_STALE_MINUTES);
        cfg.signout_redirect_delay =
            Duration::from_millis(env_parse("SIGNOUT_REDIRECT_DELAY_MS", DEFAULT_SIGNOUT_REDIRECT_DELAY_MS));
        cfg.session_refresh_margin_secs = env_parse("SESSION_REFRESH_MARGIN_SECS", DEFAULT_SESSION_REFRESH_MARGIN_SECS);
        cfg.http_timeout = Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS));
        cfg.profile_store = parse_profile_store(std::env::var("PROFILE_STORE").ok().as_deref())?;
        cfg.database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        if cfg.profile_store == ProfileStoreKind::Postgres && cfg.database_url.is_none() {
            return Err(ConfigError::Missing { var: "DATABASE_URL" });
        }
        cfg.db_max_connections = env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS);
        cfg.storage_path = std::env::var("STORAGE_PATH").ok().filter(|v| !v.is_empty()).map(PathBuf::from);
        cfg.port = env_parse("PORT", DEFAULT_PORT);
        cfg.cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| cfg.site_url.starts_with("https://"));

        Ok(cfg)
    }

    /// Absolute OAuth callback URL handed to the identity provider.
    #[must_use]
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.site_url, self.callback_path)
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { var: key })
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn parse_profile_store(raw: Option<&str>) -> Result<ProfileStoreKind, ConfigError> {
    match raw.unwrap_or("postgrest") {
        "postgrest" => Ok(ProfileStoreKind::Postgrest),
        "postgres" => Ok(ProfileStoreKind::Postgres),
        other => Err(ConfigError::Invalid { var: "PROFILE_STORE", value: other.to_owned() }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
