//! Continuation error types.

use thiserror::Error;

/// Errors raised while reading or writing continuation payloads.
///
/// Every variant is fatal to the run that receives it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContinuationError {
    /// Payload does not have the continuation shape
    #[error("Invalid continuation payload: {0}")]
    InvalidPayload(String),

    /// Payload names no state
    #[error("Continuation state is empty")]
    EmptyState,

    /// Timer map key disagrees with the entry it holds
    #[error("Timer keyed '{key}' carries id '{id}'")]
    TimerKeyMismatch { key: String, id: String },

    /// Context could not be converted to or from JSON
    #[error("Context serialization failed: {0}")]
    Serialization(String),
}
