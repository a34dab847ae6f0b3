use crate::work_unit::WorkUnit;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Keeps the pool's live-executor count accurate however the executor ends,
/// including when its task is dropped by the runtime before it first runs.
pub(crate) struct ExecutorGuard {
  running: Arc<AtomicUsize>,
}

impl ExecutorGuard {
  pub(crate) fn register(running: Arc<AtomicUsize>) -> Self {
    running.fetch_add(1, AtomicOrdering::SeqCst);
    Self { running }
  }
}

impl Drop for ExecutorGuard {
  fn drop(&mut self) {
    self.running.fetch_sub(1, AtomicOrdering::SeqCst);
  }
}

/// One executor of a pool generation.
///
/// Pulls units from the generation's queue and runs each to completion before
/// taking the next. Exits for good once the generation's shutdown token fires
/// and no unit is ready for it.
pub(crate) async fn run_executor<T, E>(
  pool_name: Arc<String>,
  executor_id: usize,
  queue_rx: kanal::AsyncReceiver<WorkUnit<T, E>>,
  shutdown_token: CancellationToken,
  _guard: ExecutorGuard,
) where
  T: Send + 'static,
  E: Send + 'static,
{
  trace!(pool_name = %*pool_name, executor_id, "Executor started.");

  loop {
    // The queue is polled first: a unit already handed to this executor must
    // run rather than be dropped with the losing branch. Close empties the
    // queue before firing the shutdown token, so nothing is left to take.
    tokio::select! {
      biased;

      received = queue_rx.recv() => match received {
        Ok(unit) => {
          trace!(pool_name = %*pool_name, executor_id, unit_id = unit.unit_id, "Dequeued work unit.");
          unit.execute().await;
        }
        Err(_) => {
          // Queue closed under us; nothing more will arrive. Only the
          // shutdown token ends the executor.
          trace!(pool_name = %*pool_name, executor_id, "Queue closed. Waiting for shutdown signal.");
          shutdown_token.cancelled().await;
          break;
        }
      },

      _ = shutdown_token.cancelled() => {
        debug!(pool_name = %*pool_name, executor_id, "Shutdown signal received. Executor terminating.");
        break;
      }
    }
  }

  trace!(pool_name = %*pool_name, executor_id, "Executor stopped.");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::PoolError;
  use std::time::Duration;

  #[tokio::test]
  async fn test_executor_runs_units_until_shutdown() {
    let (tx, rx) = kanal::bounded_async::<WorkUnit<u32, String>>(2);
    let shutdown = CancellationToken::new();
    let running = Arc::new(AtomicUsize::new(0));

    let executor = tokio::spawn(run_executor(
      Arc::new("executor_test".to_string()),
      0,
      rx,
      shutdown.clone(),
      ExecutorGuard::register(running.clone()),
    ));
    assert_eq!(running.load(AtomicOrdering::SeqCst), 1);

    let (ok_unit, ok_handle) = WorkUnit::new(CancellationToken::new(), |_ctx| async { Ok(3) }, None);
    let (err_unit, err_handle) = WorkUnit::new(CancellationToken::new(), |_ctx| async { Err("nope".to_string()) }, None);
    tx.send(ok_unit).await.unwrap();
    tx.send(err_unit).await.unwrap();

    assert_eq!(ok_handle.wait().await, Ok(3));
    assert_eq!(err_handle.wait().await, Err(PoolError::Work("nope".to_string())));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), executor)
      .await
      .expect("Executor did not stop after shutdown.")
      .unwrap();
    assert_eq!(running.load(AtomicOrdering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_executor_survives_panicking_unit() {
    let (tx, rx) = kanal::bounded_async::<WorkUnit<u32, String>>(2);
    let shutdown = CancellationToken::new();
    let running = Arc::new(AtomicUsize::new(0));

    let executor = tokio::spawn(run_executor(
      Arc::new("executor_panic_test".to_string()),
      0,
      rx,
      shutdown.clone(),
      ExecutorGuard::register(running.clone()),
    ));

    let (bad_unit, bad_handle) = WorkUnit::new(
      CancellationToken::new(),
      |_ctx| async {
        if true {
          panic!("executor test panic");
        }
        Ok(0)
      },
      None,
    );
    let (good_unit, good_handle) = WorkUnit::new(CancellationToken::new(), |_ctx| async { Ok(9) }, None);
    tx.send(bad_unit).await.unwrap();
    tx.send(good_unit).await.unwrap();

    assert!(matches!(bad_handle.wait().await, Err(PoolError::Recovery(msg)) if msg == "executor test panic"));
    assert_eq!(good_handle.wait().await, Ok(9));

    shutdown.cancel();
    executor.await.unwrap();
  }
}
