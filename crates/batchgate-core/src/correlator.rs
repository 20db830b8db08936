//! Result correlation: request id → pending one-shot slot.
//!
//! A caller registers its id before its item is queued and gets back a
//! [`WaitHandle`]. The aggregator delivers into the table by id; the caller
//! consumes the handle with [`ResultCorrelator::take`]. Each slot is written
//! at most once and read at most once. The table lock is only held for map
//! mutation, never across a wait.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time;

use crate::error::{BatchError, CorrelatorError};

/// Unique identifier tying a submitted item to its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the aggregator hands back for one request.
pub type Delivery<O> = Result<O, BatchError>;

/// The caller's half of a pending slot.
///
/// Not `Clone`: [`ResultCorrelator::take`] consumes it, so a slot can only
/// ever be read once.
#[derive(Debug)]
pub struct WaitHandle<O> {
    id: RequestId,
    rx: oneshot::Receiver<Delivery<O>>,
}

/// Table of pending slots keyed by request id.
pub struct ResultCorrelator<O> {
    slots: Mutex<HashMap<RequestId, oneshot::Sender<Delivery<O>>>>,
}

impl<O> Default for ResultCorrelator<O> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<O: Send + 'static> ResultCorrelator<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the pending slot for `id`.
    ///
    /// Ids must be unique; registering an id twice replaces the earlier slot,
    /// whose waiter then sees [`BatchError::AggregatorGone`].
    pub fn register(&self, id: RequestId) -> WaitHandle<O> {
        let (tx, rx) = oneshot::channel();
        if self.lock().insert(id, tx).is_some() {
            tracing::warn!(request_id = %id, "request id registered twice");
        }
        WaitHandle { id, rx }
    }

    /// Write the result for `id` and wake its caller.
    pub fn deliver(&self, id: RequestId, delivery: Delivery<O>) -> Result<(), CorrelatorError> {
        let tx = self
            .lock()
            .remove(&id)
            .ok_or(CorrelatorError::NotPending(id))?;
        tx.send(delivery).map_err(|_| CorrelatorError::NotPending(id))
    }

    /// Wait up to `timeout` for the result behind `handle`.
    ///
    /// On timeout the slot is removed, so a late delivery is discarded and
    /// reported to the deliverer as [`CorrelatorError::NotPending`].
    pub async fn take(&self, handle: WaitHandle<O>, timeout: Duration) -> Result<O, BatchError> {
        let WaitHandle { id, mut rx } = handle;
        match time::timeout(timeout, &mut rx).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(BatchError::AggregatorGone(id)),
            Err(_) => {
                self.forget(id);
                // A delivery can land between the timer firing and the removal.
                match rx.try_recv() {
                    Ok(delivery) => delivery,
                    Err(_) => Err(BatchError::Timeout {
                        ms: timeout.as_millis() as u64,
                    }),
                }
            }
        }
    }

    /// Drop the slot for `id` without delivering. Returns `true` if it existed.
    pub fn forget(&self, id: RequestId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of slots still waiting for a delivery.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Delivery<O>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> RequestId {
        RequestId::new(n)
    }

    #[tokio::test]
    async fn delivered_result_is_taken() {
        let correlator = ResultCorrelator::<u32>::new();
        let handle = correlator.register(id(1));
        assert_eq!(correlator.pending(), 1);

        correlator.deliver(id(1), Ok(42)).unwrap();
        assert_eq!(correlator.pending(), 0);

        let value = correlator.take(handle, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn errors_reach_the_caller() {
        let correlator = ResultCorrelator::<u32>::new();
        let handle = correlator.register(id(1));
        correlator
            .deliver(id(1), Err(BatchError::Execution("boom".into())))
            .unwrap();
        let err = correlator.take(handle, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, BatchError::Execution("boom".into()));
    }

    #[test]
    fn second_delivery_is_rejected() {
        let correlator = ResultCorrelator::<u32>::new();
        let _handle = correlator.register(id(9));
        correlator.deliver(id(9), Ok(1)).unwrap();
        assert_eq!(
            correlator.deliver(id(9), Ok(2)),
            Err(CorrelatorError::NotPending(id(9)))
        );
    }

    #[test]
    fn unknown_id_is_rejected() {
        let correlator = ResultCorrelator::<u32>::new();
        assert_eq!(
            correlator.deliver(id(5), Ok(1)),
            Err(CorrelatorError::NotPending(id(5)))
        );
    }

    #[tokio::test]
    async fn timeout_removes_slot_and_discards_late_delivery() {
        let correlator = ResultCorrelator::<u32>::new();
        let handle = correlator.register(id(3));

        let err = correlator
            .take(handle, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, BatchError::Timeout { ms: 20 });
        assert_eq!(correlator.pending(), 0);
        assert_eq!(
            correlator.deliver(id(3), Ok(7)),
            Err(CorrelatorError::NotPending(id(3)))
        );
    }

    #[tokio::test]
    async fn forgotten_slot_wakes_waiter() {
        let correlator = ResultCorrelator::<u32>::new();
        let handle = correlator.register(id(4));
        assert!(correlator.forget(id(4)));
        assert!(!correlator.forget(id(4)));

        let err = correlator.take(handle, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, BatchError::AggregatorGone(id(4)));
    }

    #[tokio::test]
    async fn unrelated_slots_are_independent() {
        let correlator = ResultCorrelator::<&'static str>::new();
        let a = correlator.register(id(1));
        let b = correlator.register(id(2));

        correlator.deliver(id(2), Ok("b")).unwrap();
        assert_eq!(correlator.take(b, Duration::from_secs(1)).await.unwrap(), "b");
        assert_eq!(correlator.pending(), 1);

        correlator.deliver(id(1), Ok("a")).unwrap();
        assert_eq!(correlator.take(a, Duration::from_secs(1)).await.unwrap(), "a");
    }
}
