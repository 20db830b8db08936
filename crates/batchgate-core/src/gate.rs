//! `RequestGate` — the per-caller entry point.
//!
//! ```text
//! submit ─► register slot ─► offer ──accepted──► take ──result──► caller
//!                              │                   │
//!                           rejected            timed out
//!                              └──────► direct single-item run ◄──┘
//! ```
//!
//! Every wait on the way is bounded by the caller's deadline, and the direct
//! path shares the aggregator's single-flight guard.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::BatchAggregator;
use crate::backpressure::{Admission, BackpressureGate, WorkItem};
use crate::config::AggregatorConfig;
use crate::correlator::{RequestId, ResultCorrelator};
use crate::error::{BatchError, ConfigError};
use crate::executor::{ExecutionAdapter, Executor};
use crate::service::InferenceService;
use crate::stats::{GateStats, StatsSnapshot};

/// Batching front door for one execution adapter.
///
/// Must be created inside a Tokio runtime: when batching is enabled the
/// aggregator task is spawned on construction.
pub struct RequestGate<A: ExecutionAdapter> {
    config: AggregatorConfig,
    executor: Arc<Executor<A>>,
    correlator: Arc<ResultCorrelator<A::Output>>,
    intake: BackpressureGate<A::Input>,
    stats: Arc<GateStats>,
    next_id: AtomicU64,
    aggregator: Option<JoinHandle<()>>,
}

impl<A: ExecutionAdapter> RequestGate<A> {
    /// Validate `config`, take ownership of `adapter` and start aggregating.
    pub fn new(adapter: A, config: AggregatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let executor = Arc::new(Executor::new(adapter));
        let correlator = Arc::new(ResultCorrelator::new());
        let stats = Arc::new(GateStats::default());

        let capacity = NonZeroUsize::new(config.queue_capacity).filter(|_| config.batching_enabled());
        let (intake, aggregator) = match capacity {
            Some(capacity) => {
                let (intake, queue) = BackpressureGate::bounded(capacity);
                let task = BatchAggregator::new(
                    queue,
                    Arc::clone(&executor),
                    Arc::clone(&correlator),
                    Arc::clone(&stats),
                    &config,
                )
                .spawn();
                (intake, Some(task))
            }
            None => {
                info!(
                    adapter = executor.adapter().name(),
                    max_batch_size = config.max_batch_size,
                    queue_capacity = config.queue_capacity,
                    "aggregation disabled, executing requests directly"
                );
                (BackpressureGate::disabled(), None)
            }
        };

        Ok(Self {
            config,
            executor,
            correlator,
            intake,
            stats,
            next_id: AtomicU64::new(1),
            aggregator,
        })
    }

    /// Submit one input and wait for its result, at most `deadline`.
    ///
    /// A full queue or a late aggregator sends the input down the direct
    /// path. Execution failures are returned as-is, never retried.
    pub async fn submit(
        &self,
        input: A::Input,
        deadline: Duration,
    ) -> Result<A::Output, BatchError> {
        let due = Instant::now() + deadline;
        self.stats.record_submitted();

        if self.aggregator.is_none() {
            self.stats.record_direct();
            return self.run_single(input, due).await;
        }

        let id = self.next_request_id();
        let handle = self.correlator.register(id);
        // Dropped with this future, so a cancelled caller leaves no slot behind.
        let _slot = SlotGuard {
            correlator: self.correlator.as_ref(),
            id,
        };
        let item = WorkItem::new(id, input.clone());

        if let Admission::Rejected(_) = self
            .intake
            .offer(item, self.config.admission_wait.min(deadline))
            .await
        {
            self.correlator.forget(id);
            self.stats.record_rejected();
            warn!(request_id = %id, "intake queue full, executing directly");
            return self.run_single(input, due).await;
        }
        self.stats.record_queued();

        let wait = self
            .config
            .result_wait_timeout
            .min(due.saturating_duration_since(Instant::now()));
        match self.correlator.take(handle, wait).await {
            Err(err) if err.is_fallback_eligible() => {
                self.stats.record_timed_out();
                warn!(request_id = %id, error = %err, "no batched result in time, executing directly");
                self.run_single(input, due).await
            }
            other => other,
        }
    }

    /// Execute a caller-formed batch as one adapter call, bypassing the queue.
    pub async fn submit_batch(
        &self,
        inputs: Vec<A::Input>,
        deadline: Duration,
    ) -> Result<Vec<A::Output>, BatchError> {
        let due = Instant::now() + deadline;
        self.stats.record_client_batch();
        debug!(size = inputs.len(), "executing caller batch");
        self.executor.run_until(inputs, due).await
    }

    /// Run `inputs` once through the adapter before serving traffic.
    pub async fn warm_up(&self, inputs: Vec<A::Input>) -> Result<(), BatchError> {
        let size = inputs.len();
        let started = Instant::now();
        self.executor.run(inputs).await?;
        info!(
            adapter = self.executor.adapter().name(),
            size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "warm-up complete"
        );
        Ok(())
    }

    /// Stop accepting work, let the aggregator flush what it holds, and wait
    /// for it to exit.
    pub async fn shutdown(self) {
        let Self {
            intake, aggregator, ..
        } = self;
        drop(intake);
        if let Some(task) = aggregator {
            if let Err(e) = task.await {
                warn!(error = %e, "batch aggregator ended abnormally");
            }
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns `true` if submissions go through the aggregator.
    pub fn is_batching(&self) -> bool {
        self.aggregator.is_some()
    }

    /// Items currently waiting in the intake queue.
    pub fn queued(&self) -> usize {
        self.intake.queued()
    }

    /// Returns `true` while the adapter is executing a batch.
    pub fn is_busy(&self) -> bool {
        self.executor.is_busy()
    }

    /// Callers currently waiting on a batched result.
    pub fn pending(&self) -> usize {
        self.correlator.pending()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn run_single(&self, input: A::Input, due: Instant) -> Result<A::Output, BatchError> {
        let mut outputs = self.executor.run_until(vec![input], due).await?;
        outputs
            .pop()
            .ok_or(BatchError::LengthMismatch { expected: 1, actual: 0 })
    }
}

/// Removes a registered slot when the submitting future ends, however it ends.
struct SlotGuard<'a, O: Send + 'static> {
    correlator: &'a ResultCorrelator<O>,
    id: RequestId,
}

impl<O: Send + 'static> Drop for SlotGuard<'_, O> {
    fn drop(&mut self) {
        if self.correlator.forget(self.id) {
            debug!(request_id = %self.id, "caller went away, slot removed");
        }
    }
}

#[async_trait]
impl<A: ExecutionAdapter> InferenceService for RequestGate<A> {
    type Input = A::Input;
    type Output = A::Output;

    async fn infer(&self, input: A::Input) -> Result<A::Output, BatchError> {
        self.submit(input, self.config.request_deadline).await
    }

    async fn infer_many(&self, inputs: Vec<A::Input>) -> Result<Vec<A::Output>, BatchError> {
        self.submit_batch(inputs, self.config.request_deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl ExecutionAdapter for Upper {
        type Input = String;
        type Output = String;

        fn execute(&self, inputs: Vec<String>) -> anyhow::Result<Vec<String>> {
            Ok(inputs.iter().map(|s| s.to_uppercase()).collect())
        }

        fn name(&self) -> &str {
            "upper"
        }
    }

    fn batching(max_batch_size: usize) -> AggregatorConfig {
        AggregatorConfig {
            max_batch_size,
            flush_timeout: Duration::from_millis(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let result = RequestGate::new(Upper, batching(0));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { field: "max_batch_size", .. })
        ));
    }

    #[tokio::test]
    async fn batch_size_one_runs_directly() {
        let gate = RequestGate::new(Upper, batching(1)).unwrap();
        assert!(!gate.is_batching());

        let out = gate.submit("a".into(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "A");

        let stats = gate.stats();
        assert_eq!(stats.direct, 1);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.batches, 0);
    }

    #[tokio::test]
    async fn zero_capacity_runs_directly() {
        let config = AggregatorConfig {
            queue_capacity: 0,
            ..batching(4)
        };
        let gate = RequestGate::new(Upper, config).unwrap();
        assert!(!gate.is_batching());
        assert_eq!(gate.submit("z".into(), Duration::from_secs(1)).await.unwrap(), "Z");
    }

    #[tokio::test]
    async fn queued_request_is_batched() {
        let gate = RequestGate::new(Upper, batching(4)).unwrap();
        assert!(gate.is_batching());

        let out = gate.submit("hello".into(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(out, "HELLO");

        let stats = gate.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.batches, 1);
        assert_eq!(gate.pending(), 0);
        gate.shutdown().await;
    }

    #[tokio::test]
    async fn caller_batch_keeps_order() {
        let gate = RequestGate::new(Upper, batching(2)).unwrap();
        let out = gate
            .submit_batch(vec!["x".into(), "y".into(), "z".into()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, vec!["X", "Y", "Z"]);
        assert_eq!(gate.stats().client_batches, 1);
    }

    #[tokio::test]
    async fn service_trait_uses_configured_deadline() {
        let gate = RequestGate::new(Upper, batching(4)).unwrap();
        let service: &dyn InferenceService<Input = String, Output = String> = &gate;
        assert_eq!(service.infer("q".into()).await.unwrap(), "Q");
        assert_eq!(
            service.infer_many(vec!["r".into()]).await.unwrap(),
            vec!["R".to_string()]
        );
    }

    #[tokio::test]
    async fn warm_up_runs_the_adapter() {
        let gate = RequestGate::new(Upper, batching(4)).unwrap();
        gate.warm_up(vec!["w".into(); 4]).await.unwrap();
        // Warm-up is not a submission.
        assert_eq!(gate.stats().submitted, 0);
    }
}
