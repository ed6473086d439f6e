//! Journal error types.

use thiserror::Error;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame corrupted at offset {offset}: CRC mismatch (expected {expected:#x}, got {actual:#x})")]
    CorruptedFrame {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("invalid frame header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("segment not found: {0}")]
    SegmentNotFound(u64),

    #[error("journal is closed")]
    Closed,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JournalError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JournalError::Io(_))
    }
}
