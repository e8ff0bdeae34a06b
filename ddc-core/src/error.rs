//! Error types for DDC
//!
//! Provides a unified error type for all content engine operations.

use thiserror::Error;

/// Result type alias for DDC operations
pub type Result<T> = std::result::Result<T, DdcError>;

/// Unified error type for DDC
#[derive(Error, Debug)]
pub enum DdcError {
    // ===== Malformed Input =====
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Invalid CID '{cid}': {reason}")]
    InvalidCid { cid: String, reason: String },

    #[error("Invalid piece size: {size} bytes (allowed: {min}..={max})")]
    InvalidPieceSize { size: usize, min: usize, max: usize },

    #[error("Invalid byte range {start}..{end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("CID already assigned: {existing}")]
    CidAlreadyAssigned { existing: String },

    // ===== Backend I/O =====
    #[error("Backend {operation} failed (bucket {bucket}, target {target}): {reason}")]
    Backend {
        operation: &'static str,
        bucket: String,
        target: String,
        reason: String,
    },

    #[error("Not found in bucket {bucket}: {target}")]
    NotFound { bucket: String, target: String },

    #[error("Upload of piece {position} aborted before completion (bucket {bucket})")]
    UploadAborted { bucket: String, position: usize },

    // ===== Integrity =====
    #[error(
        "Integrity error (bucket {bucket}, cid {cid}): expected {expected} bytes, got {actual}"
    )]
    SizeMismatch {
        bucket: String,
        cid: String,
        expected: u64,
        actual: u64,
    },

    #[error("Corrupt DAG node: {0}")]
    CorruptNode(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DdcError {
    /// Build a backend error with operation context
    pub fn backend(
        operation: &'static str,
        bucket: impl ToString,
        target: impl ToString,
        reason: impl ToString,
    ) -> Self {
        DdcError::Backend {
            operation,
            bucket: bucket.to_string(),
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Build a URI parse error
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        DdcError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error was caused by caller input rather than I/O
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            DdcError::InvalidUri { .. }
                | DdcError::InvalidCid { .. }
                | DdcError::InvalidPieceSize { .. }
                | DdcError::InvalidRange { .. }
                | DdcError::CidAlreadyAssigned { .. }
        )
    }
}

impl From<prost::DecodeError> for DdcError {
    fn from(err: prost::DecodeError) -> Self {
        DdcError::Serialization(err.to_string())
    }
}

impl From<prost::EncodeError> for DdcError {
    fn from(err: prost::EncodeError) -> Self {
        DdcError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DdcError::SizeMismatch {
            bucket: "7".to_string(),
            cid: "bafkreiabc".to_string(),
            expected: 10,
            actual: 8,
        };
        assert_eq!(
            err.to_string(),
            "Integrity error (bucket 7, cid bafkreiabc): expected 10 bytes, got 8"
        );
    }

    #[test]
    fn test_backend_error_context() {
        let err = DdcError::backend("get_piece", 42u64, "bafkreixyz", "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("get_piece"));
        assert!(msg.contains("bucket 42"));
        assert!(msg.contains("bafkreixyz"));
        assert!(!err.is_malformed_input());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DdcError = io_err.into();
        assert!(matches!(err, DdcError::Io(_)));
    }

    #[test]
    fn test_malformed_input_classification() {
        assert!(DdcError::invalid_uri("/x", "missing prefix").is_malformed_input());
        assert!(DdcError::InvalidRange { start: 5, end: 1 }.is_malformed_input());
    }
}
