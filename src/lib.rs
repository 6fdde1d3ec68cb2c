//! pocketlm core: inference session management for a local LLM chat client.
//!
//! The heart of the crate is [`session::SessionManager`], which owns the
//! single loaded model context, serializes generation against load/eject, and
//! streams tokens over channels with cooperative cancellation. Around it sit
//! the [`engine`] capability traits (the native backend is opaque), the pure
//! [`template`] renderer that maps a message history to a model family's
//! chat-turn format, and the [`server`] gateway exposing an OpenAI-compatible
//! completion endpoint.

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod server;
pub mod session;
pub mod storage;
pub mod template;

// Re-export commonly used types
pub use chat::{Message, MessageRole};
pub use config::{InferenceConfig, ServerConfig, Settings};
pub use engine::{EchoEngine, InferenceEngine, ModelContext, ModelInfo, ResourceUsage};
pub use error::{Error, Result};
pub use session::{
    Completion, CompletionStream, FinishReason, GenerationRequest, SessionLimits, SessionManager,
    SessionState, StreamEvent,
};
pub use template::ChatTemplate;
