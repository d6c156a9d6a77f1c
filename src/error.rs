//! Custom error types for kbindex
//!
//! Uses thiserror for ergonomic error definitions with automatic
//! Display and Error trait implementations.

use std::path::PathBuf;
use thiserror::Error;

/// Application-specific errors for kbindex
#[derive(Error, Debug)]
pub enum KbError {
    /// IO operations failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single document could not be read
    #[error("Cannot read {}: {}", .path.display(), .source)]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single document could not be parsed
    #[error("Cannot parse {}: {}", .path.display(), .message)]
    Parse { path: PathBuf, message: String },

    /// Tokenizer failed to load or decode
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Embedding provider failed or returned malformed output
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index invariants violated
    #[error("Index error: {0}")]
    Index(String),

    /// Writing an index artifact to disk failed
    #[error("Failed to persist {}: {}", .path.display(), .source)]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON parsing failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Document tree digest could not be computed
    #[error("Digest error: {0}")]
    Digest(String),

    /// Invalid file or directory path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KbError {
    /// Build a `Persistence` error for the given path
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, KbError>;
