//! Error types for the auction-audit core

use thiserror::Error;

/// Errors that can occur in the audit pipeline and archive sink
#[derive(Debug, Error)]
pub enum AuditError {
    /// Invalid or incomplete module configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filter rejected at the registry boundary
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Registry is full and the filter key is new
    #[error("Filter registry at max capacity ({max})")]
    AtCapacity { max: usize },

    /// Broker connection or subscription failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failed to enqueue a record onto the matched-event topic
    #[error("Failed to produce to topic '{topic}': {reason}")]
    Produce {
        topic: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object-store upload failure
    #[error("Upload failed for key '{key}': {reason}")]
    Upload {
        key: String,
        reason: String,
    },

    /// Object-store upload exceeded the configured deadline
    #[error("Upload timed out for key '{key}'")]
    UploadTimeout { key: String },

    /// Filesystem failure (fallback writes)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
