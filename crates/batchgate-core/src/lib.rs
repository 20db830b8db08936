//! batchgate-core — dynamic request batching in front of a single shared model.
//!
//! # Overview
//!
//! Independent callers submit one input each; a background aggregator groups
//! them into batches and runs each batch through a non-reentrant
//! [`ExecutionAdapter`], then hands every caller its own result. The crate
//! defines:
//!
//! - [`RequestGate`] — per-caller entry point with bounded waits and a direct
//!   fallback path
//! - [`BatchAggregator`] — the background batching loop
//! - [`BackpressureGate`] — bounded FIFO intake queue
//! - [`ResultCorrelator`] — request id → one-shot result slot
//! - [`Executor`] — single-flight guard around the adapter
//! - [`InferenceService`] — the trait a request handler depends on
//! - [`AggregatorConfig`], [`BatchError`], [`GateStats`], [`init_tracing`]

pub mod aggregator;
pub mod backpressure;
pub mod config;
pub mod correlator;
pub mod error;
pub mod executor;
pub mod gate;
pub mod service;
pub mod stats;
pub mod telemetry;

pub use aggregator::{AggregatorState, BatchAggregator, FlushReason};
pub use backpressure::{Admission, BackpressureGate, IntakeQueue, WorkItem};
pub use config::AggregatorConfig;
pub use correlator::{Delivery, RequestId, ResultCorrelator, WaitHandle};
pub use error::{BatchError, ConfigError, CorrelatorError};
pub use executor::{ExecutionAdapter, Executor};
pub use gate::RequestGate;
pub use service::InferenceService;
pub use stats::{GateStats, StatsSnapshot};
pub use telemetry::{init_tracing, LogConfig};
