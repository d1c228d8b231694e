//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the one auth orchestrator for this process, the navigator that
//! parks login redirects until the browser next polls, and the typed config.

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::orchestrator::AuthOrchestrator;
use crate::provider::PendingRedirect;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: AuthOrchestrator,
    pub redirects: Arc<PendingRedirect>,
    pub config: Arc<AuthConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: AuthOrchestrator, redirects: Arc<PendingRedirect>, config: AuthConfig) -> Self {
        Self { orchestrator, redirects, config: Arc::new(config) }
    }
}
