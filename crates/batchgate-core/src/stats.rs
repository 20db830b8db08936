//! Lock-free counters describing how requests were served.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

use crate::aggregator::AggregatorState;

/// Shared counters, updated by the gate and the aggregator.
#[derive(Debug, Default)]
pub struct GateStats {
    submitted: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    direct: AtomicU64,
    client_batches: AtomicU64,
    batches: AtomicU64,
    batched_items: AtomicU64,
    batch_failures: AtomicU64,
    largest_batch: AtomicU64,
    state: AtomicU8,
}

/// Point-in-time copy of [`GateStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Single-item submissions seen by the gate.
    pub submitted: u64,
    /// Submissions admitted to the intake queue.
    pub queued: u64,
    /// Submissions turned away by a full queue (served directly).
    pub rejected: u64,
    /// Queued submissions that gave up on the aggregator (served directly).
    pub timed_out: u64,
    /// Submissions served directly because aggregation is disabled.
    pub direct: u64,
    /// Caller-formed batches executed through `submit_batch`.
    pub client_batches: u64,
    /// Batches flushed by the aggregator.
    pub batches: u64,
    /// Items carried by those batches.
    pub batched_items: u64,
    /// Aggregator batches the adapter failed.
    pub batch_failures: u64,
    pub largest_batch: u64,
    pub state: AggregatorState,
}

impl GateStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_direct(&self) {
        self.direct.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_client_batch(&self) {
        self.client_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, size: usize, ok: bool) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.batched_items.fetch_add(size as u64, Ordering::Relaxed);
        self.largest_batch.fetch_max(size as u64, Ordering::Relaxed);
        if !ok {
            self.batch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_state(&self, state: AggregatorState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Current aggregator state.
    pub fn state(&self) -> AggregatorState {
        AggregatorState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            direct: self.direct.load(Ordering::Relaxed),
            client_batches: self.client_batches.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batched_items: self.batched_items.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
            state: self.state(),
        }
    }
}
