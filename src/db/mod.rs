//! Direct Postgres profile store.
//!
//! SYSTEM CONTEXT
//! ==============
//! Selected with `PROFILE_STORE=postgres` for deployments that reach the
//! database without going through PostgREST. The schema is owned by the
//! hosted project, so no migrations run here; the pool only reads.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;

use crate::error::{ProfileErrorKind, ProfileFetchError};
use crate::profile::ProfileRecord;
use crate::provider::ProfileStore;

const PROFILE_QUERY: &str = r"
SELECT uo.user_id::text                               AS user_id,
       o.id::text                                     AS office_id,
       o.name                                         AS office_name,
       COALESCE(o.type, '')                           AS office_type,
       COALESCE(o.location, '')                       AS office_location,
       r.id::text                                     AS role_id,
       r.name                                         AS role_name,
       COALESCE(r.description, '')                    AS role_description,
       COALESCE(r.permissions, ARRAY[]::text[])       AS permissions,
       COALESCE(uo.assigned_at::text, '')             AS assigned_at
  FROM user_offices uo
  JOIN offices o ON o.id = uo.office_id
  JOIN roles r   ON r.id = uo.role_id
 WHERE uo.user_id::text = $1
 ORDER BY uo.assigned_at";

/// Initialize the `PostgreSQL` connection pool.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    office_id: String,
    office_name: String,
    office_type: String,
    office_location: String,
    role_id: String,
    role_name: String,
    role_description: String,
    permissions: Vec<String>,
    assigned_at: String,
}

impl From<ProfileRow> for ProfileRecord {
    fn from(row: ProfileRow) -> Self {
        Self {
            user_id: row.user_id,
            office_id: row.office_id,
            office_name: row.office_name,
            office_type: row.office_type,
            office_location: row.office_location,
            role_id: row.role_id,
            role_name: row.role_name,
            role_description: row.role_description,
            permissions: row.permissions,
            assigned_at: row.assigned_at,
        }
    }
}

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn query_profile_records(&self, principal_id: &str) -> Result<Vec<ProfileRecord>, ProfileFetchError> {
        let rows = sqlx::query_as::<_, ProfileRow>(PROFILE_QUERY)
            .bind(principal_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ProfileFetchError::new(classify_sqlx(&e), e.to_string()))?;
        debug!(user_id = %principal_id, count = rows.len(), "profile rows fetched");
        Ok(rows.into_iter().map(ProfileRecord::from).collect())
    }
}

/// Credential and privilege failures (`28000`, `28P01`, `42501`) are auth;
/// connection trouble is transport; row shape mismatches are decode.
pub(crate) fn classify_sqlx(e: &sqlx::Error) -> ProfileErrorKind {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            ProfileErrorKind::Transport
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => ProfileErrorKind::Decode,
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("28000" | "28P01" | "42501")) => {
            ProfileErrorKind::Auth
        }
        _ => ProfileErrorKind::Store,
    }
}
