//! The `InferenceService` trait — what a request handler depends on.

use async_trait::async_trait;

use crate::error::BatchError;

/// Request-level inference interface.
///
/// # Object Safety
/// The trait is object-safe and can be stored as
/// `Arc<dyn InferenceService<Input = I, Output = O>>`.
#[async_trait]
pub trait InferenceService: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Run one input, batched with concurrent callers where possible.
    async fn infer(&self, input: Self::Input) -> Result<Self::Output, BatchError>;

    /// Run a caller-formed batch in one execution, preserving order.
    async fn infer_many(
        &self,
        inputs: Vec<Self::Input>,
    ) -> Result<Vec<Self::Output>, BatchError>;
}
