use crate::error::PoolError;
use crate::executor::{run_executor, ExecutorGuard};
use crate::handle::WaitHandle;
use crate::work_unit::{ReportFn, WorkUnit};

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// One open period of the pool: its queue, its shutdown signal and the
/// executors reading from that queue. Replaced wholesale by `reset`.
struct Generation<T, E> {
  id: u64,
  queue_tx: kanal::AsyncSender<WorkUnit<T, E>>,
  queue_rx: kanal::AsyncReceiver<WorkUnit<T, E>>,
  shutdown_token: CancellationToken,
}

impl<T, E> Generation<T, E> {
  /// Resolves every unit still queued with `make_err()`, then stops the
  /// executors. Returns the number of drained units.
  ///
  /// Must run with no sender active. The queue is empty by the time the
  /// shutdown token fires, so no executor can pick up a unit after it.
  fn shut_down(self, pool_name: &str, make_err: impl Fn() -> PoolError<E>) -> usize
  where
    T: Send + 'static,
    E: Send + 'static,
  {
    let mut drained = 0;
    while let Ok(Some(unit)) = self.queue_rx.try_recv() {
      unit.reject(make_err());
      drained += 1;
    }

    self.shutdown_token.cancel();
    let _ = self.queue_tx.close();

    info!(pool_name, generation = self.id, drained, "Generation closed.");
    drained
  }
}

struct PoolState<T, E> {
  /// `None` while the pool is closed.
  generation: Option<Generation<T, E>>,
  next_generation_id: u64,
}

/// A fixed-size worker pool.
///
/// `workers` executors pull units from a queue holding at most `2 * workers`
/// pending units. The pool starts open, can be closed any number of times,
/// and reopened with [`reset`](Self::reset).
pub struct LimitedPool<T: Send + 'static, E: Send + 'static> {
  pool_name: Arc<String>,
  workers: usize,
  tokio_handle: TokioHandle,
  state: RwLock<PoolState<T, E>>,
  running_executors: Arc<AtomicUsize>,
}

impl<T: Send + 'static, E: Send + 'static> LimitedPool<T, E> {
  /// Creates an open pool with `workers` executors spawned on `tokio_handle`.
  ///
  /// # Panics
  /// Panics if `workers` is zero.
  pub fn new(workers: usize, tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    assert!(workers > 0, "invalid workers '0'");

    let pool_name = Arc::new(pool_name.to_string());
    let running_executors = Arc::new(AtomicUsize::new(0));
    let first_generation = spawn_generation(0, workers, &pool_name, &tokio_handle, &running_executors);
    info!(pool_name = %*pool_name, workers, capacity = workers * 2, "Pool created.");

    Arc::new(Self {
      pool_name,
      workers,
      tokio_handle,
      state: RwLock::new(PoolState {
        generation: Some(first_generation),
        next_generation_id: 1,
      }),
      running_executors,
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Maximum number of units waiting in the queue.
  pub fn capacity(&self) -> usize {
    self.workers * 2
  }

  pub async fn is_closed(&self) -> bool {
    self.state.read().await.generation.is_none()
  }

  /// Returns the number of units waiting in the current generation's queue.
  pub async fn queued_count(&self) -> usize {
    match &self.state.read().await.generation {
      Some(generation) => generation.queue_rx.len(),
      None => 0,
    }
  }

  /// Number of executors, across all generations, that have not exited yet.
  ///
  /// An executor of a closed generation still counts while it finishes the
  /// unit it was running.
  pub fn running_executors(&self) -> usize {
    self.running_executors.load(AtomicOrdering::SeqCst)
  }

  /// Submits `work` and returns the handle to wait on its outcome.
  ///
  /// Suspends only while the queue is full, until a slot frees or `ctx` is
  /// cancelled. A closed pool resolves the unit with `PoolError::PoolClosed`
  /// and `report` has already run when this returns.
  pub async fn queue<F, Fut>(&self, ctx: CancellationToken, work: F, report: Option<ReportFn<T, E>>) -> WaitHandle<T, E>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let (unit, handle) = WorkUnit::new(ctx.clone(), work, report);
    let unit_id = unit.unit_id;

    let state = self.state.read().await;
    let Some(generation) = state.generation.as_ref() else {
      debug!(pool_name = %*self.pool_name, unit_id, "Queue: pool is closed. Rejecting work unit.");
      unit.reject(PoolError::PoolClosed);
      return handle;
    };

    if ctx.is_cancelled() {
      unit.reject(PoolError::Cancelled);
      return handle;
    }

    tokio::select! {
      biased;

      // Dropping the pending send drops the unit, which resolves it as cancelled.
      _ = ctx.cancelled() => {
        debug!(pool_name = %*self.pool_name, unit_id, "Queue: context cancelled before a queue slot freed.");
      }

      sent = generation.queue_tx.send(unit) => match sent {
        Ok(()) => trace!(pool_name = %*self.pool_name, generation = generation.id, unit_id, "Work unit queued."),
        Err(send_error) => {
          warn!(pool_name = %*self.pool_name, unit_id, "Queue: send to an open generation failed: {:?}", send_error);
        }
      }
    }

    handle
  }

  /// Reopens a closed pool with a fresh queue, shutdown signal and executor
  /// set. Does nothing if the pool is open.
  pub async fn reset(&self) {
    let mut state = self.state.write().await;
    if state.generation.is_some() {
      trace!(pool_name = %*self.pool_name, "Reset: pool already open.");
      return;
    }

    let generation_id = state.next_generation_id;
    state.next_generation_id += 1;
    state.generation = Some(spawn_generation(
      generation_id,
      self.workers,
      &self.pool_name,
      &self.tokio_handle,
      &self.running_executors,
    ));
    info!(pool_name = %*self.pool_name, generation = generation_id, "Pool reset.");
  }

  /// Closes the pool.
  ///
  /// Executors stop taking work; a unit already running finishes normally.
  /// Units still queued are resolved with `PoolError::PoolClosed`. Closing a
  /// closed pool does nothing.
  pub async fn close(&self) {
    self.close_with(|| PoolError::PoolClosed).await;
  }

  /// Like [`close`](Self::close), but resolves drained units with `err`.
  pub async fn close_with_error(&self, err: PoolError<E>)
  where
    E: Clone,
  {
    self.close_with(move || err.clone()).await;
  }

  async fn close_with(&self, make_err: impl Fn() -> PoolError<E>) {
    let mut state = self.state.write().await;
    match state.generation.take() {
      Some(generation) => {
        info!(pool_name = %*self.pool_name, generation = generation.id, "Closing pool.");
        generation.shut_down(&self.pool_name, make_err);
      }
      None => trace!(pool_name = %*self.pool_name, "Close: pool already closed."),
    }
  }
}

fn spawn_generation<T, E>(
  generation_id: u64,
  workers: usize,
  pool_name: &Arc<String>,
  tokio_handle: &TokioHandle,
  running_executors: &Arc<AtomicUsize>,
) -> Generation<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  let (queue_tx, queue_rx) = kanal::bounded_async(workers * 2);
  let shutdown_token = CancellationToken::new();

  for executor_id in 0..workers {
    let guard = ExecutorGuard::register(running_executors.clone());
    tokio_handle.spawn(
      run_executor(pool_name.clone(), executor_id, queue_rx.clone(), shutdown_token.clone(), guard).instrument(info_span!(
        "pool_executor",
        pool_name = %**pool_name,
        generation = generation_id,
        executor = executor_id
      )),
    );
  }

  debug!(pool_name = %**pool_name, generation = generation_id, workers, "Spawned executor generation.");
  Generation {
    id: generation_id,
    queue_tx,
    queue_rx,
    shutdown_token,
  }
}

impl<T: Send + 'static, E: Send + 'static> Drop for LimitedPool<T, E> {
  fn drop(&mut self) {
    // No other borrow can exist here, so the state is reachable without the runtime.
    match self.state.get_mut().generation.take() {
      Some(generation) => {
        info!(pool_name = %*self.pool_name, "LimitedPool dropped while open. Closing current generation.");
        generation.shut_down(&self.pool_name, || PoolError::PoolClosed);
      }
      None => trace!(pool_name = %*self.pool_name, "Drop: pool already closed."),
    }
  }
}

impl<T: Send + 'static, E: Send + 'static> std::fmt::Debug for LimitedPool<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LimitedPool")
      .field("pool_name", &self.pool_name)
      .field("workers", &self.workers)
      .field("running_executors", &self.running_executors())
      .finish_non_exhaustive()
  }
}
