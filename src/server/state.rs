//! Gateway state shared across handlers.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::session::SessionManager;
use crate::storage::ModelStore;

/// Shared state for the completion gateway.
#[derive(Clone)]
pub struct ServerState {
    /// The one inference session this process serves.
    pub session: SessionManager,
    /// Persisted model records (storage collaborator, not session state).
    pub model_store: Arc<dyn ModelStore>,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
}

impl ServerState {
    pub fn new(
        session: SessionManager,
        model_store: Arc<dyn ModelStore>,
        config: ServerConfig,
    ) -> Self {
        Self {
            session,
            model_store,
            config: Arc::new(config),
        }
    }
}
