//! pocketlm service binary: loads a model (if configured) and serves the
//! local OpenAI-compatible completion gateway.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pocketlm_core::{
    config::{Args, Settings},
    server::{self, ServerState},
    session::{SessionLimits, SessionManager},
    storage::{MemoryModelStore, ModelRecord, ModelStore},
    EchoEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args)?;
    info!(host = %settings.server.host, port = settings.server.port, "starting pocketlm");

    let session = SessionManager::new(
        Arc::new(EchoEngine::new()),
        SessionLimits {
            max_generation_tokens: settings.server.max_generation_tokens,
            stream_buffer: settings.server.stream_buffer,
        },
    );

    let model_store = Arc::new(MemoryModelStore::new());

    if let Some(path) = &settings.preferences.last_used_model_path {
        match session.load_model(path, &settings.inference).await {
            Ok(model_info) => {
                let size_bytes = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                model_store
                    .insert(ModelRecord {
                        id: model_info.name.clone(),
                        name: model_info.name.clone(),
                        path: path.clone(),
                        size_bytes,
                    })
                    .await?;
                info!(model = %model_info.name, "startup model loaded");
            }
            Err(e) => warn!(error = %e, "startup model load failed; serving without a model"),
        }
    }

    let state = ServerState::new(session, model_store, settings.server.clone());
    server::run(state).await
}
