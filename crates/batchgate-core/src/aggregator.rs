//! Background aggregation loop: intake queue → batches → adapter → correlator.
//!
//! State transitions:
//! - `Idle` → `Collecting`:     first item received, flush timer armed
//! - `Collecting` → `Flushing`: batch full, or `flush_timeout` elapsed since
//!   the first item
//! - `Flushing` → `Idle`:       adapter call returned (or failed)
//!
//! The loop awaits each flush before collecting the next batch, so there is
//! never more than one batch in flight. A failed batch fails every member and
//! the loop carries on. It exits only when every sender is gone.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info};

use crate::backpressure::{IntakeQueue, WorkItem};
use crate::config::AggregatorConfig;
use crate::correlator::{Delivery, RequestId, ResultCorrelator};
use crate::executor::{ExecutionAdapter, Executor};
use crate::stats::GateStats;

/// Aggregator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AggregatorState {
    /// Queue empty, waiting for a first item.
    Idle = 0,
    /// Batch open, flush timer running.
    Collecting = 1,
    /// Adapter call in progress.
    Flushing = 2,
}

impl AggregatorState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Collecting,
            2 => Self::Flushing,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for AggregatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Collecting => write!(f, "collecting"),
            Self::Flushing => write!(f, "flushing"),
        }
    }
}

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Reached `max_batch_size`.
    Full,
    /// `flush_timeout` elapsed since the first item.
    Timeout,
    /// The intake queue closed with items still held.
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Timeout => write!(f, "timeout"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The single background task that forms and executes batches.
pub struct BatchAggregator<A: ExecutionAdapter> {
    queue: IntakeQueue<A::Input>,
    executor: Arc<Executor<A>>,
    correlator: Arc<ResultCorrelator<A::Output>>,
    stats: Arc<GateStats>,
    max_batch_size: usize,
    flush_timeout: Duration,
}

impl<A: ExecutionAdapter> BatchAggregator<A> {
    pub fn new(
        queue: IntakeQueue<A::Input>,
        executor: Arc<Executor<A>>,
        correlator: Arc<ResultCorrelator<A::Output>>,
        stats: Arc<GateStats>,
        config: &AggregatorConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            correlator,
            stats,
            max_batch_size: config.max_batch_size.max(1),
            flush_timeout: config.flush_timeout,
        }
    }

    /// Spawn the loop onto the current Tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the intake queue is closed and drained.
    pub async fn run(mut self) {
        info!(
            adapter = self.executor.adapter().name(),
            max_batch_size = self.max_batch_size,
            flush_timeout_ms = self.flush_timeout.as_millis() as u64,
            "batch aggregator started"
        );

        while let Some((batch, reason)) = self.collect().await {
            self.flush(batch, reason).await;
        }

        self.stats.set_state(AggregatorState::Idle);
        info!("batch aggregator stopped");
    }

    /// Wait for a first item, then gather more until the batch is full or
    /// the timer armed on that first item fires.
    ///
    /// Returns `None` once the queue is closed and empty.
    async fn collect(&mut self) -> Option<(Vec<WorkItem<A::Input>>, FlushReason)> {
        self.stats.set_state(AggregatorState::Idle);
        let first = self.queue.recv().await?;

        self.stats.set_state(AggregatorState::Collecting);
        let mut batch = Vec::with_capacity(self.max_batch_size);
        batch.push(first);

        let deadline = time::sleep(self.flush_timeout);
        tokio::pin!(deadline);

        while batch.len() < self.max_batch_size {
            tokio::select! {
                // Items already waiting go into this batch before the timer is checked.
                biased;
                item = self.queue.recv() => match item {
                    Some(item) => batch.push(item),
                    None => return Some((batch, FlushReason::Shutdown)),
                },
                _ = &mut deadline => return Some((batch, FlushReason::Timeout)),
            }
        }
        Some((batch, FlushReason::Full))
    }

    async fn flush(&mut self, batch: Vec<WorkItem<A::Input>>, reason: FlushReason) {
        self.stats.set_state(AggregatorState::Flushing);

        let size = batch.len();
        let oldest_wait_ms = batch
            .first()
            .map(|item| item.enqueued_at.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let (ids, inputs): (Vec<RequestId>, Vec<A::Input>) = batch
            .into_iter()
            .map(|item| (item.request_id, item.input))
            .unzip();

        debug!(size, %reason, oldest_wait_ms, "flushing batch");
        let started = Instant::now();

        match self.executor.run(inputs).await {
            Ok(outputs) => {
                self.stats.record_batch(size, true);
                debug!(
                    size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch executed"
                );
                // Executor guarantees one output per input, in order.
                for (id, output) in ids.into_iter().zip(outputs) {
                    self.deliver(id, Ok(output));
                }
            }
            Err(err) => {
                self.stats.record_batch(size, false);
                error!(size, %reason, error = %err, "batch execution failed");
                for id in ids {
                    self.deliver(id, Err(err.clone()));
                }
            }
        }
    }

    fn deliver(&self, id: RequestId, delivery: Delivery<A::Output>) {
        if let Err(e) = self.correlator.deliver(id, delivery) {
            // The caller timed out and went down the direct path.
            debug!(request_id = %id, error = %e, "dropping late result");
        }
    }
}
