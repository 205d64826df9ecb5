//! Error types for the fields map and its synchronization engine.

use crate::types::DocumentId;
use thiserror::Error;

/// Main error type for index and primary store operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write to document {0} timed out")]
    WriteTimeout(DocumentId),

    #[error("Malformed change event for document {id}: {reason}")]
    MalformedEvent { id: DocumentId, reason: String },

    #[error("Rename of document {id} failed: {cause}")]
    RenameFailed { id: DocumentId, cause: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Index is locked by another process")]
    Locked,

    #[error("Index not initialized")]
    NotInitialized,

    #[error("Invalid index format: {0}")]
    InvalidFormat(String),

    #[error("Transport closed")]
    TransportClosed,
}

impl IndexError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::WriteTimeout(_))
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for IndexError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for IndexError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        IndexError::Deserialization(e.to_string())
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
