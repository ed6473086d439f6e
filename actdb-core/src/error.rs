//! Core error types.

use thiserror::Error;

/// Errors from the execution engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} name already registered: {name}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("duplicate transition for machine '{machine}': event '{event}' from state '{from}'")]
    DuplicateTransition {
        machine: String,
        event: String,
        from: String,
    },

    #[error("unknown {kind} reference: id {id}")]
    UnknownReference { kind: &'static str, id: u64 },

    #[error(
        "chain integrity violation: action {action_id} is not on context {context_id}'s chain"
    )]
    ChainIntegrity { context_id: u64, action_id: u64 },

    #[error("concurrent modification on {kind} {id}: expected {expected}, actual {actual}")]
    ConcurrentModification {
        kind: &'static str,
        id: u64,
        expected: u64,
        actual: u64,
    },

    #[error("invalid definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("instance retired: {instance_id}")]
    InstanceRetired { instance_id: u64 },

    #[error("journal error: {0}")]
    Journal(#[from] actdb_journal::JournalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether the caller is expected to retry the operation.
    ///
    /// Losing an append/advance race is the only condition a driver should
    /// retry automatically; everything else requires intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::ConcurrentModification { .. } => true,
            CoreError::Journal(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a stable error code suitable for external surfaces.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::DuplicateName { .. } => "DUPLICATE_NAME",
            CoreError::DuplicateTransition { .. } => "DUPLICATE_TRANSITION",
            CoreError::UnknownReference { .. } => "UNKNOWN_REFERENCE",
            CoreError::ChainIntegrity { .. } => "CHAIN_INTEGRITY",
            CoreError::ConcurrentModification { .. } => "CONFLICT",
            CoreError::InvalidDefinition { .. } => "BAD_REQUEST",
            CoreError::InstanceRetired { .. } => "INSTANCE_RETIRED",
            CoreError::Journal(_) => "JOURNAL_IO_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}
