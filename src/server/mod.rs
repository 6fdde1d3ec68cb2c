//! Local completion gateway.
//!
//! Exposes the session manager over an OpenAI-compatible HTTP surface so
//! external tools on the same machine can drive the loaded model.

use axum::{extract::Json, http::StatusCode, response::IntoResponse, Router};
use serde_json::json;
use tracing::info;

pub mod openai;
pub mod state;

pub use state::ServerState;

/// Build the full gateway router.
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .nest("/v1", openai::create_router())
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

/// Bind and serve the gateway until ctrl-c.
pub async fn run(state: ServerState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "completion gateway listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
