//! Error types for the execution engine.

use dbmask_core::CoreError;

/// Errors that can occur while running an anonymization.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Blueprint, scheduling, or value-computation error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid declarative spec file.
    #[error("Spec file error: {0}")]
    Spec(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (reading the spec file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
