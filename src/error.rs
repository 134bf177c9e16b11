use std::path::PathBuf;
use thiserror::Error;

use crate::chunking::ChunkError;
use crate::embedding::EmbeddingError;
use crate::storage::StoreError;

/// Main error type for evidx
#[derive(Error, Debug)]
pub enum EvidxError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Chunking failed for a reference
    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Evidence store errors. Connection failures land here and are fatal.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A store worker died mid-call
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EvidxError {
    /// True when the evidence store itself is unreachable.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            EvidxError::Infrastructure(_) => true,
            EvidxError::Store(e) => e.is_infrastructure(),
            _ => false,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for evidx operations
pub type Result<T> = std::result::Result<T, EvidxError>;
