//! OpenAI-compatible completion endpoints.
//!
//! A thin adapter over the session manager: requests are translated into a
//! [`GenerationRequest`], and the resulting completion stream is serialized
//! either as a single JSON object or as an SSE stream of
//! `chat.completion.chunk` frames terminated by a `[DONE]` line.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::chat::{Message, MessageRole};
use crate::session::{GenerationRequest, StreamEvent};

use super::state::ServerState;

/// OpenAI chat completion request (the subset this gateway serves).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    pub max_tokens: Option<usize>,
}

fn default_temperature() -> f64 {
    0.7
}

/// Chat message as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: WireMessage,
    pub finish_reason: String,
}

/// Model list response.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub data: Vec<GatewayModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayModel {
    pub id: String,
    pub name: String,
    pub object: String,
}

/// Create the `/v1` router.
pub fn create_router() -> Router<ServerState> {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(list_models))
}

fn to_domain_messages(messages: &[WireMessage]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| Message::new("", MessageRole::parse(&m.role), m.content.clone()))
        .collect()
}

async fn chat_completions(
    State(state): State<ServerState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    info!(model = %request.model, stream = request.stream, messages = request.messages.len(),
          "chat completion request");

    if !state.session.is_model_loaded() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No model loaded"})),
        )
            .into_response();
    }

    let generation = GenerationRequest {
        chat_id: String::new(),
        assistant_message_id: String::new(),
        messages: to_domain_messages(&request.messages),
        max_tokens: request.max_tokens,
    };

    if request.stream {
        return stream_chat(state, request, generation).await;
    }

    let completion = state.session.generate_completion(generation).collect().await;

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: request.model,
        choices: vec![ChatChoice {
            index: 0,
            message: WireMessage {
                role: "assistant".to_string(),
                content: completion.content,
            },
            finish_reason: "stop".to_string(),
        }],
    };
    Json(response).into_response()
}

enum SseFrame {
    Chunk(serde_json::Value),
    Done,
}

/// Streaming completion: one frame per token in strict generation order,
/// one final frame with `finish_reason: "stop"`, then a literal `[DONE]`.
async fn stream_chat(
    state: ServerState,
    request: ChatCompletionRequest,
    generation: GenerationRequest,
) -> Response {
    let (tx, rx) = mpsc::channel::<SseFrame>(state.config.stream_buffer.max(1));
    let stream_id = format!("chatcmpl-{}", Uuid::new_v4());
    let model = request.model.clone();

    let mut completion_stream = state.session.generate_completion(generation);

    tokio::spawn(async move {
        while let Some(event) = completion_stream.next().await {
            match event {
                StreamEvent::Token(token) => {
                    let chunk = json!({
                        "id": stream_id,
                        "object": "chat.completion.chunk",
                        "created": chrono::Utc::now().timestamp(),
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": {"role": "assistant", "content": token},
                            "finish_reason": null
                        }]
                    });
                    if tx.send(SseFrame::Chunk(chunk)).await.is_err() {
                        // Client went away; cancel the generation and let its
                        // terminal event drain into the void.
                        completion_stream.cancel();
                        break;
                    }
                }
                StreamEvent::Done(_) => {
                    let final_chunk = json!({
                        "id": stream_id,
                        "object": "chat.completion.chunk",
                        "created": chrono::Utc::now().timestamp(),
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": null,
                            "finish_reason": "stop"
                        }]
                    });
                    let _ = tx.send(SseFrame::Chunk(final_chunk)).await;
                    let _ = tx.send(SseFrame::Done).await;
                    break;
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|frame| {
        Ok::<_, Infallible>(match frame {
            SseFrame::Chunk(value) => axum::response::sse::Event::default().data(value.to_string()),
            SseFrame::Done => axum::response::sse::Event::default().data("[DONE]"),
        })
    });

    Sse::new(stream).into_response()
}

async fn list_models(State(state): State<ServerState>) -> Response {
    match state.model_store.list().await {
        Ok(records) => {
            let data = records
                .into_iter()
                .map(|record| GatewayModel {
                    id: record.id,
                    name: record.name,
                    object: "model".to_string(),
                })
                .collect();
            Json(ModelsResponse { data }).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to list models");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
