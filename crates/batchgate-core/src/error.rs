//! Error types for the batching pipeline.

use thiserror::Error;

use crate::correlator::RequestId;

/// Errors a caller of [`RequestGate`](crate::RequestGate) can receive.
///
/// Queue rejection never appears here: a full queue always sends the caller
/// down the direct path instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// The execution adapter failed the whole batch.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// The execution adapter panicked while running the batch.
    #[error("Execution panicked: {0}")]
    Panicked(String),

    /// The adapter broke the one-result-per-input contract.
    #[error("Adapter returned {actual} results for {expected} inputs")]
    LengthMismatch { expected: usize, actual: usize },

    /// No result was delivered within the correlation wait.
    #[error("No result delivered within {ms}ms")]
    Timeout { ms: u64 },

    /// The per-request deadline passed before any path produced a result.
    #[error("Deadline exceeded after {ms}ms")]
    DeadlineExceeded { ms: u64 },

    /// The pending slot was dropped without a delivery.
    #[error("Request {0} was dropped before a result was delivered")]
    AggregatorGone(RequestId),
}

impl BatchError {
    /// Returns `true` if the caller should retry through the direct path.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::AggregatorGone(_))
    }

    /// Returns `true` if the adapter itself failed the batch.
    pub fn is_execution_error(&self) -> bool {
        matches!(
            self,
            Self::Execution(_) | Self::Panicked(_) | Self::LengthMismatch { .. }
        )
    }
}

/// Errors from the result correlation table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelatorError {
    /// No caller is waiting on this id (never registered, already delivered,
    /// or the caller gave up).
    #[error("Request {0} is not pending")]
    NotPending(RequestId),
}

/// Errors raised while building or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}")]
    Parse { var: &'static str, value: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
