//! PostgREST profile store: `user_offices` rows joined with their office
//! and role, flattened into [`ProfileRecord`]s.
//!
//! Pure parsing in `flatten_rows` and `classify_error` for testability.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use super::AccessTokenSource;
use crate::config::AuthConfig;
use crate::error::{ProfileErrorKind, ProfileFetchError};
use crate::profile::ProfileRecord;
use crate::provider::ProfileStore;

pub const PROFILE_TABLE: &str = "user_offices";
pub const PROFILE_SELECT: &str =
    "user_id,assigned_at,offices(id,name,type,location),roles(id,name,description,permissions)";

// =============================================================================
// CLIENT
// =============================================================================

pub struct PostgrestProfileStore {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl PostgrestProfileStore {
    #[must_use]
    pub fn new(config: &AuthConfig, http: reqwest::Client, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self::with_client(http, &config.supabase_url, &config.supabase_anon_key, tokens)
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, base_url: &str, anon_key: &str, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned(), anon_key: anon_key.to_owned(), tokens }
    }
}

#[async_trait]
impl ProfileStore for PostgrestProfileStore {
    async fn query_profile_records(&self, principal_id: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError> {
        let bearer = self
            .tokens
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        let filter = format!("eq.{principal_id}");
        let response = self
            .http
            .get(format!("{}/rest/v1/{PROFILE_TABLE}", self.base_url))
            .query(&[("select", PROFILE_SELECT), ("user_id", filter.as_str())])
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| ProfileFetchError::new(ProfileErrorKind::Transport, e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProfileFetchError::new(ProfileErrorKind::Transport, e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(classify_error(status, &text));
        }

        let mut records = flatten_rows(&text)?;
        let before = records.len();
        records.retain(|r| r.user_id == principal_id);
        if records.len() != before {
            warn!(user_id = %principal_id, dropped = before - records.len(), "rows for another principal ignored");
        }
        debug!(user_id = %principal_id, count = records.len(), "profile rows fetched");
        Ok(records)
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct UserOfficeRow {
    #[serde(deserialize_with = "string_or_number")]
    user_id: String,
    #[serde(default)]
    assigned_at: Option<String>,
    #[serde(default)]
    offices: Option<OfficeRow>,
    #[serde(default)]
    roles: Option<RoleRow>,
}

#[derive(Deserialize)]
struct OfficeRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    office_type: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize)]
struct RoleRow {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    permissions: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Flatten joined rows. Rows missing their office or role are skipped.
pub(crate) fn flatten_rows(body: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError> {
    let rows: Vec<UserOfficeRow> =
        serde_json::from_str(body).map_err(|e| ProfileFetchError::new(ProfileErrorKind::Decode, e.to_string()))?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let (Some(office), Some(role)) = (row.offices, row.roles) else {
                warn!(user_id = %row.user_id, "assignment without office or role skipped");
                return None;
            };
            Some(ProfileRecord {
                user_id: row.user_id,
                office_id: office.id,
                office_name: office.name,
                office_type: office.office_type.unwrap_or_default(),
                office_location: office.location.unwrap_or_default(),
                role_id: role.id,
                role_name: role.name,
                role_description: role.description.unwrap_or_default(),
                permissions: role.permissions.unwrap_or_default(),
                assigned_at: row.assigned_at.unwrap_or_default(),
            })
        })
        .collect())
}

/// Map a PostgREST error response onto the closed error kinds.
///
/// `PGRST301`, HTTP 401, and JWT/token messages mean the credential was
/// rejected; everything else is a store failure.
pub(crate) fn classify_error(status: u16, body: &str) -> ProfileFetchError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code.unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| body.trim().to_owned());
    let lowered = message.to_ascii_lowercase();

    let kind = if status == 401 || code == "PGRST301" || lowered.contains("jwt") || lowered.contains("token") {
        ProfileErrorKind::Auth
    } else {
        ProfileErrorKind::Store
    };
    let detail = if code.is_empty() { format!("HTTP {status}: {message}") } else { format!("{code}: {message}") };
    ProfileFetchError::new(kind, detail)
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
