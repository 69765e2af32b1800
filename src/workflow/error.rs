//! Workflow error types.

use super::migration::MigrationError;
use crate::chart::{ExecutorError, ResolveError};
use crate::continuation::ContinuationError;
use thiserror::Error;

/// Errors that end a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    InvalidContinuation(#[from] ContinuationError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Resumed state does not exist in this chart
    #[error(transparent)]
    UnresolvableState(#[from] ResolveError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Workflow has already exited")]
    Exited,

    #[error("The {channel} channel closed while the workflow was running")]
    Disconnected { channel: &'static str },
}

impl WorkflowError {
    /// Whether retrying the run could succeed.
    ///
    /// Only a failed migration effect is retryable: a fix can be deployed
    /// and the task retried. Everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Migration(_))
    }
}
