//! The `ExecutionAdapter` trait and the single-flight executor around it.
//!
//! Every execution path (aggregator flush, queue fallback, caller batches,
//! warm-up) goes through one [`Executor`], which owns the adapter and the
//! mutex guarding it. The adapter runs on a blocking thread and the guard is
//! moved onto that thread, so it is only released when the adapter call
//! actually returns, even if the waiting caller has given up.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, Instant};

use crate::error::BatchError;

/// A shared, non-reentrant processing resource (typically a loaded model).
///
/// # Contract
/// - `execute` returns exactly one output per input, in input order, or
///   fails the whole batch.
/// - It is never invoked concurrently; the [`Executor`] guarantees this.
/// - It may block; it always runs on a blocking thread.
///
/// Inputs are cloned once per request for the fallback path, so large
/// payloads should be wrapped in an `Arc`.
pub trait ExecutionAdapter: Send + Sync + 'static {
    type Input: Clone + Send + 'static;
    type Output: Send + 'static;

    /// Run one ordered batch.
    fn execute(&self, inputs: Vec<Self::Input>) -> anyhow::Result<Vec<Self::Output>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "adapter"
    }
}

/// Owns the adapter and serializes every call into it.
pub struct Executor<A> {
    adapter: Arc<A>,
    guard: Arc<Mutex<()>>,
}

impl<A: ExecutionAdapter> Executor<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter: Arc::new(adapter),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Returns `true` while an execution holds the resource.
    pub fn is_busy(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Run a batch, waiting as long as it takes for the resource.
    pub async fn run(&self, inputs: Vec<A::Input>) -> Result<Vec<A::Output>, BatchError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let expected = inputs.len();
        let guard = Arc::clone(&self.guard).lock_owned().await;
        Self::finish(self.spawn(guard, inputs).await, expected)
    }

    /// Run a batch, giving up with [`BatchError::DeadlineExceeded`] if the
    /// resource is not free, or the call has not returned, by `deadline`.
    pub async fn run_until(
        &self,
        inputs: Vec<A::Input>,
        deadline: Instant,
    ) -> Result<Vec<A::Output>, BatchError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let expected = inputs.len();
        let started = Instant::now();
        let exceeded = || BatchError::DeadlineExceeded {
            ms: started.elapsed().as_millis() as u64,
        };

        let guard = time::timeout_at(deadline, Arc::clone(&self.guard).lock_owned())
            .await
            .map_err(|_| exceeded())?;
        let joined = time::timeout_at(deadline, self.spawn(guard, inputs))
            .await
            .map_err(|_| exceeded())?;
        Self::finish(joined, expected)
    }

    fn spawn(
        &self,
        guard: OwnedMutexGuard<()>,
        inputs: Vec<A::Input>,
    ) -> JoinHandle<anyhow::Result<Vec<A::Output>>> {
        let adapter = Arc::clone(&self.adapter);
        task::spawn_blocking(move || {
            let _guard = guard;
            adapter.execute(inputs)
        })
    }

    fn finish(
        joined: Result<anyhow::Result<Vec<A::Output>>, JoinError>,
        expected: usize,
    ) -> Result<Vec<A::Output>, BatchError> {
        match joined {
            Ok(Ok(outputs)) if outputs.len() == expected => Ok(outputs),
            Ok(Ok(outputs)) => Err(BatchError::LengthMismatch {
                expected,
                actual: outputs.len(),
            }),
            Ok(Err(e)) => Err(BatchError::Execution(format!("{e:#}"))),
            Err(e) => Err(BatchError::Panicked(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Scripted {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ExecutionAdapter for Scripted {
        type Input = i32;
        type Output = i32;

        fn execute(&self, inputs: Vec<i32>) -> anyhow::Result<Vec<i32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            match inputs.first() {
                Some(-1) => anyhow::bail!("rejected by model"),
                Some(-2) => panic!("model crashed"),
                Some(-3) => Ok(vec![0]),
                _ => Ok(inputs.iter().map(|v| v + 1).collect()),
            }
        }
    }

    #[tokio::test]
    async fn outputs_follow_inputs() {
        let exec = Executor::new(Scripted::default());
        assert_eq!(exec.run(vec![1, 2, 3]).await.unwrap(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_batch_skips_the_adapter() {
        let exec = Executor::new(Scripted::default());
        assert!(exec.run(vec![]).await.unwrap().is_empty());
        assert_eq!(exec.adapter().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn adapter_error_becomes_execution_error() {
        let exec = Executor::new(Scripted::default());
        let err = exec.run(vec![-1, 5]).await.unwrap_err();
        assert_eq!(err, BatchError::Execution("rejected by model".into()));
    }

    #[tokio::test]
    async fn adapter_panic_is_contained() {
        let exec = Executor::new(Scripted::default());
        let err = exec.run(vec![-2]).await.unwrap_err();
        assert!(matches!(err, BatchError::Panicked(_)), "got {err:?}");
        // The guard was released despite the panic.
        assert_eq!(exec.run(vec![1]).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn short_output_is_a_length_mismatch() {
        let exec = Executor::new(Scripted::default());
        let err = exec.run(vec![-3, 1, 2]).await.unwrap_err();
        assert_eq!(err, BatchError::LengthMismatch { expected: 3, actual: 1 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deadline_bounds_the_wait_for_a_busy_resource() {
        let exec = Arc::new(Executor::new(Scripted {
            delay: Duration::from_millis(300),
            ..Default::default()
        }));

        let busy = {
            let exec = Arc::clone(&exec);
            tokio::spawn(async move { exec.run(vec![1]).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(exec.is_busy());

        let started = std::time::Instant::now();
        let err = exec
            .run_until(vec![2], Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::DeadlineExceeded { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_millis(250));

        assert_eq!(busy.await.unwrap().unwrap(), vec![2]);
        assert_eq!(exec.adapter().calls.load(Ordering::SeqCst), 1);
    }
}
