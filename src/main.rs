mod config;
mod db;
mod error;
mod login;
mod orchestrator;
mod profile;
mod provider;
mod retry;
mod routes;
mod session;
mod state;
mod storage;
mod supabase;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{AuthConfig, ProfileStoreKind};
use crate::orchestrator::{AuthDeps, AuthOrchestrator, OrchestratorConfig};
use crate::profile::ProfileCache;
use crate::provider::{PendingRedirect, ProfileStore};
use crate::storage::{DurableStorage, FileStorage, IdentityStore, MemoryStorage};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AuthConfig::from_env().expect("invalid auth configuration");

    let http = supabase::http_client(config.http_timeout).expect("http client init failed");
    let identity = Arc::new(supabase::SupabaseAuth::new(&config, http.clone()));

    let profiles: Arc<dyn ProfileStore> = match config.profile_store {
        ProfileStoreKind::Postgrest => Arc::new(supabase::PostgrestProfileStore::new(&config, http, identity.clone())),
        ProfileStoreKind::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL required");
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(db::PgProfileStore::new(pool))
        }
    };

    // Persisted identity survives restarts only with STORAGE_PATH set.
    let storage: Arc<dyn DurableStorage> = match &config.storage_path {
        Some(path) => Arc::new(FileStorage::new(path.clone())),
        None => Arc::new(MemoryStorage::new()),
    };

    let redirects = Arc::new(PendingRedirect::new());
    let orchestrator = AuthOrchestrator::new(
        AuthDeps {
            identity,
            profiles,
            navigator: redirects.clone(),
            cache: ProfileCache::new(),
            identity_store: IdentityStore::new(storage),
        },
        OrchestratorConfig::from(&config),
    );

    let outcome = orchestrator.initialize().await;
    tracing::info!(?outcome, "auth initialized");

    let port = config.port;
    let app = routes::app(state::AppState::new(orchestrator.clone(), redirects, config));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "officehub-session listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    orchestrator.dispose();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
