//! Error types for packstore
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::blob::BlobRef;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for packstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Metadata Index Errors
    // -------------------------------------------------------------------------
    #[error("Index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("Index is not empty; reindex only runs against an empty index")]
    IndexNotEmpty,

    // -------------------------------------------------------------------------
    // Piece Errors
    // -------------------------------------------------------------------------
    #[error("Piece not found: {0}")]
    NotFound(BlobRef),

    #[error("Piece already exists: {0}")]
    AlreadyExists(BlobRef),

    #[error("Writer already committed")]
    AlreadyCommitted,

    #[error("Extent of {file} is short: expected {expected} bytes, copied {copied}")]
    ShortExtent {
        file: String,
        expected: u64,
        copied: u64,
    },

    // -------------------------------------------------------------------------
    // Layout Errors
    // -------------------------------------------------------------------------
    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True if the error means the piece does not exist (or is trashed)
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Map a uniqueness violation from the index to `AlreadyExists`
    pub(crate) fn from_insert(err: rusqlite::Error, blob: &BlobRef) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::AlreadyExists(blob.clone())
            }
            other => StoreError::Index(other),
        }
    }
}
