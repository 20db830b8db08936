//! Classification error types.

use thiserror::Error;

/// Reasons a model's output cannot be turned into classifications.
///
/// Any of these fails the whole batch it occurred in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifyError {
    #[error("Model returned {actual} rows for {expected} inputs")]
    RowCount { expected: usize, actual: usize },

    #[error("Row {row} has {actual} scores but the model has {expected} labels")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Row {row} contains a non-finite score")]
    NonFinite { row: usize },

    #[error("Model has no labels")]
    NoLabels,
}
