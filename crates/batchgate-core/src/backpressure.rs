//! Bounded FIFO intake queue between callers and the aggregator.
//!
//! `offer` never blocks past its wait budget. A full queue answers
//! [`Admission::Rejected`] and hands the item back so the caller can take the
//! direct path; rejection is an expected outcome under load, not an error.

use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{self, Instant};

use crate::correlator::RequestId;

/// One queued unit of work.
#[derive(Debug)]
pub struct WorkItem<I> {
    pub request_id: RequestId,
    pub input: I,
    pub enqueued_at: Instant,
}

impl<I> WorkItem<I> {
    pub fn new(request_id: RequestId, input: I) -> Self {
        Self {
            request_id,
            input,
            enqueued_at: Instant::now(),
        }
    }
}

/// Outcome of [`BackpressureGate::offer`].
#[derive(Debug)]
pub enum Admission<I> {
    Accepted,
    /// The queue stayed full (or is closed); the item comes back untouched.
    Rejected(WorkItem<I>),
}

impl<I> Admission<I> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Receiving end drained by the aggregator.
pub type IntakeQueue<I> = mpsc::Receiver<WorkItem<I>>;

/// Sending end of the intake queue.
pub struct BackpressureGate<I> {
    tx: Option<mpsc::Sender<WorkItem<I>>>,
    capacity: usize,
}

impl<I: Send + 'static> BackpressureGate<I> {
    /// Create a gate holding at most `capacity` items, and its queue.
    pub fn bounded(capacity: NonZeroUsize) -> (Self, IntakeQueue<I>) {
        let (tx, rx) = mpsc::channel(capacity.get());
        let gate = Self {
            tx: Some(tx),
            capacity: capacity.get(),
        };
        (gate, rx)
    }

    /// A gate with no queue behind it: every offer is rejected.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            capacity: 0,
        }
    }

    /// Try to admit `item`, waiting up to `wait_budget` for room.
    pub async fn offer(&self, item: WorkItem<I>, wait_budget: Duration) -> Admission<I> {
        let Some(tx) = &self.tx else {
            return Admission::Rejected(item);
        };

        let item = match tx.try_send(item) {
            Ok(()) => return Admission::Accepted,
            Err(TrySendError::Closed(item)) => return Admission::Rejected(item),
            Err(TrySendError::Full(item)) => item,
        };
        if wait_budget.is_zero() {
            return Admission::Rejected(item);
        }

        // Reserve first so the item is still ours if the wait runs out.
        match time::timeout(wait_budget, tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(item);
                Admission::Accepted
            }
            Ok(Err(_)) | Err(_) => Admission::Rejected(item),
        }
    }

    /// Items currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx
            .as_ref()
            .map(|tx| self.capacity - tx.capacity())
            .unwrap_or(0)
    }

    /// Returns `true` if nothing can ever be admitted.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}
