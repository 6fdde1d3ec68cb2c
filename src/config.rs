//! Configuration management for the pocketlm service.
//!
//! Configuration is loaded from multiple sources, later sources overriding
//! earlier ones:
//! 1. Built-in defaults
//! 2. User-specified configuration file (TOML)
//! 3. Environment variables (prefixed with `POCKETLM_`)
//! 4. Command-line arguments

use clap::Parser;
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Command-line arguments
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the completion gateway to
    #[clap(long)]
    pub host: Option<String>,

    /// Port for the completion gateway
    #[clap(long)]
    pub port: Option<u16>,

    /// Model file to load at startup (GGUF path)
    #[clap(long)]
    pub model: Option<PathBuf>,

    /// Number of CPU threads for inference
    #[clap(long)]
    pub threads: Option<usize>,

    /// Number of layers to offload to the GPU
    #[clap(long)]
    pub gpu_layers: Option<usize>,

    /// Context window size in tokens
    #[clap(long)]
    pub context_size: Option<usize>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Gateway configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Inference defaults applied at model load time
    #[serde(default)]
    pub inference: InferenceConfig,
    /// User preferences (persisted by the preferences collaborator)
    #[serde(default)]
    pub preferences: Preferences,
}

/// Completion gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hard cap on tokens emitted by a single generation
    #[serde(default = "default_max_generation_tokens")]
    pub max_generation_tokens: usize,
    /// Capacity of the per-request token channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_generation_tokens: default_max_generation_tokens(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

/// Snapshot of inference parameters passed to the engine at load time.
/// Changing any of these requires an eject and reload; a loaded context is
/// never reconfigured in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub gpu_layers: usize,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            gpu_layers: 0,
            context_size: default_context_size(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
        }
    }
}

/// Typed user preferences consumed by the UI layer and the session bootstrap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub last_used_model_path: Option<PathBuf>,
    #[serde(default = "default_auto_save_chats")]
    pub auto_save_chats: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_generation_tokens() -> usize {
    1000
}

fn default_stream_buffer() -> usize {
    100
}

// Single-threaded default matches the original mobile deployment, where the
// native thread pool misbehaved under OpenMP.
fn default_threads() -> usize {
    1
}

fn default_context_size() -> usize {
    2048
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> usize {
    40
}

fn default_repeat_penalty() -> f32 {
    1.1
}

impl Settings {
    /// Load settings from defaults, optional file, environment and CLI.
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.clone()));
        }

        builder = builder.add_source(config::Environment::with_prefix("POCKETLM").separator("__"));

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Some(host) = &args.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = args.port {
            settings.server.port = port;
        }
        if let Some(threads) = args.threads {
            settings.inference.threads = threads;
        }
        if let Some(gpu_layers) = args.gpu_layers {
            settings.inference.gpu_layers = gpu_layers;
        }
        if let Some(context_size) = args.context_size {
            settings.inference.context_size = context_size;
        }
        if let Some(model) = &args.model {
            settings.preferences.last_used_model_path = Some(model.clone());
        }

        Ok(settings)
    }
}

fn default_auto_save_chats() -> bool {
    true
}
