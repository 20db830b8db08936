//! batchgate-classify — turn a logits model into a batching-ready classifier.
//!
//! A [`LogitsModel`] produces one row of raw scores per input.
//! [`ClassifierAdapter`] wraps it as a
//! [`batchgate_core::ExecutionAdapter`]: each row goes through a softmax, the
//! top label becomes the prediction, and the item is flagged when that label
//! is in the flagged set (NSFW labels by default).

pub mod adapter;
pub mod error;
pub mod softmax;

pub use adapter::{
    warmup_inputs, Classification, ClassifierAdapter, LogitsModel, DEFAULT_FLAGGED_LABELS,
};
pub use error::ClassifyError;
pub use softmax::{argmax, round4, softmax};
