//! Error types for caskkv
//!
//! Provides a unified error type for all operations. A missing key is not an
//! error: lookups report it through [`crate::Lookup::NotFound`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for caskkv operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Truncated record: expected {expected} bytes, {available} available")]
    TruncatedRecord { expected: usize, available: usize },

    #[error("Segment {0} is referenced by the keydir but missing on disk")]
    MissingSegment(u64),

    // -------------------------------------------------------------------------
    // Encoding Errors
    // -------------------------------------------------------------------------
    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Cask is closed")]
    Closed,

    #[error("Cask directory {} is locked by another writer", .0.display())]
    Locked(PathBuf),
}

impl CaskError {
    /// True for errors that indicate on-disk data can no longer be trusted
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            CaskError::Corruption(_)
                | CaskError::TruncatedRecord { .. }
                | CaskError::MissingSegment(_)
        )
    }
}
