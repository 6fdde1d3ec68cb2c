//! Engine abstraction layer over the native inference backend.
//!
//! The numeric engine itself is an opaque external module; this layer defines
//! the capability surface the session manager drives. A loaded model is
//! represented by an owned [`ModelContext`] that never leaves the session's
//! custody, so a stale native handle cannot be dereferenced by construction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::InferenceConfig;
use crate::error::Result;

pub mod echo;

pub use echo::EchoEngine;

/// Factory for native model contexts.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Load the model file at `path` into a fresh native context.
    ///
    /// Safe to call while a previous context exists; callers are expected to
    /// drop (or [`ModelContext::unload`]) the old context before or as part of
    /// installing the new one.
    async fn load_model(
        &self,
        path: &Path,
        config: &InferenceConfig,
    ) -> Result<Box<dyn ModelContext>>;
}

/// A loaded model in native memory. Exactly one may exist per session.
///
/// Generation is stateful: a non-empty prompt (re)primes the context and
/// yields the first fragment, an empty prompt continues from internal state,
/// and an empty fragment signals end-of-generation.
#[async_trait]
pub trait ModelContext: Send {
    /// Produce the next text fragment. See the trait-level contract.
    async fn next_token(&mut self, prompt: &str) -> Result<String>;

    /// Clear internal generation state (KV cache) without unloading.
    async fn reset(&mut self) -> Result<()>;

    /// Release native resources. The context must not be used afterwards;
    /// dropping the box is the backstop for implementations without an
    /// explicit release path.
    async fn unload(&mut self) -> Result<()>;

    /// Static information about the loaded model.
    fn info(&self) -> &ModelInfo;

    /// Fractional utilization snapshot for the loaded model.
    fn resource_usage(&self) -> ResourceUsage;
}

/// Model information surfaced to the UI and the template renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name; drives chat template selection.
    pub name: String,
    pub parameters: Option<String>,
    pub context_length: usize,
}

impl ModelInfo {
    /// Derive model info from a file path the way the native loader does:
    /// the display name is the file name.
    pub fn from_path(path: &Path, config: &InferenceConfig) -> Self {
        Self {
            name: path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string(),
            parameters: None,
            context_length: config.context_size,
        }
    }
}

/// Fractional resource utilization, all values in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu: f32,
    pub ram: f32,
    pub vram: f32,
    pub gpu: f32,
}
