//! Error types for tornet
//!
//! Provides a unified error type shared by all tornet crates.

use thiserror::Error;

use crate::digest::Digest;

/// Result type alias for tornet operations
pub type Result<T> = std::result::Result<T, TornetError>;

/// Unified error type for tornet
#[derive(Error, Debug)]
pub enum TornetError {
    // ===== Lookup Errors =====
    #[error("not found: {0}")]
    NotFound(String),

    // ===== Integrity Errors =====
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: Digest, actual: Digest },

    #[error("block rejected by rule {rule}: {detail}")]
    BlockRejected { rule: u8, detail: String },

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    // ===== Protocol Errors =====
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ===== Resource Errors =====
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("insufficient credit: balance {balance}, required {required}")]
    OutOfCredit { balance: i64, required: i64 },

    // ===== Task Errors =====
    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out: {0}")]
    Timeout(String),
}

impl TornetError {
    /// True for errors raised by a failed hash, signature, or chain-rule check.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            TornetError::ChecksumMismatch { .. }
                | TornetError::BlockRejected { .. }
                | TornetError::BadSignature(_)
        )
    }
}
