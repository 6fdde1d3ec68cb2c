//! Error types for the pocketlm core.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// A specialized Result type for pocketlm operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for pocketlm operations.
#[derive(Debug)]
pub enum Error {
    /// Model load failures: bad path, malformed file, resource exhaustion
    Load(String),
    /// Operation rejected because the session is busy (load-while-loading,
    /// generate-while-not-ready)
    Busy(&'static str),
    /// Native engine errors observed mid-generation
    Generation(String),
    /// Storage collaborator errors
    Storage(String),
    /// Configuration errors
    Config(String),
    /// I/O errors
    Io(std::io::Error),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Internal errors
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load(msg) => write!(f, "Model load error: {}", msg),
            Error::Busy(msg) => write!(f, "Session busy: {}", msg),
            Error::Generation(msg) => write!(f, "Generation error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
