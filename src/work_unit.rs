use crate::error::{PoolError, WorkResult};
use crate::handle::WaitHandle;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_WORK_UNIT_ID: AtomicU64 = AtomicU64::new(0);
}

/// Callback invoked once per work unit with its final outcome.
///
/// It runs on the executor after the work function returns, or synchronously
/// on the submitting task when the unit is rejected or drained.
pub type ReportFn<T, E> = Arc<dyn Fn(&WorkResult<T, E>) + Send + Sync + 'static>;

pub(crate) type WorkFn<T, E> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send + 'static>;

/// One submitted task, owned by the pool until an executor runs it.
pub(crate) struct WorkUnit<T, E> {
  pub(crate) unit_id: u64,
  ctx: CancellationToken,
  work: WorkFn<T, E>,
  completer: Completer<T, E>,
}

impl<T, E> WorkUnit<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Creates a unit and the wait handle bound to its completion signal.
  pub(crate) fn new<F, Fut>(ctx: CancellationToken, work: F, report: Option<ReportFn<T, E>>) -> (Self, WaitHandle<T, E>)
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let unit_id = NEXT_WORK_UNIT_ID.fetch_add(1, AtomicOrdering::Relaxed);
    let (result_tx, result_rx) = oneshot::channel();

    let unit = WorkUnit {
      unit_id,
      ctx: ctx.clone(),
      work: Box::new(move |ctx| work(ctx).boxed()),
      completer: Completer {
        unit_id,
        report,
        result_tx: Some(result_tx),
      },
    };
    let handle = WaitHandle {
      unit_id,
      ctx,
      result_receiver: result_rx,
    };
    (unit, handle)
  }

  /// Resolves the unit with `err` without running its work function.
  pub(crate) fn reject(self, err: PoolError<E>) {
    debug!(unit_id = self.unit_id, error = %ErrKind(&err), "Work unit rejected.");
    self.completer.complete(Err(err));
  }

  /// Runs the work function with the unit's context and resolves the unit.
  ///
  /// A panic while building or polling the work future becomes
  /// [`PoolError::Recovery`]; it never unwinds into the executor.
  pub(crate) async fn execute(self) {
    let WorkUnit {
      unit_id,
      ctx,
      work,
      completer,
    } = self;

    trace!(unit_id, "Executing work unit.");
    let outcome = match AssertUnwindSafe(async move { work(ctx).await }).catch_unwind().await {
      Ok(Ok(value)) => Ok(value),
      Ok(Err(work_err)) => Err(PoolError::Work(work_err)),
      Err(panic_payload) => {
        let message = panic_message(panic_payload.as_ref());
        error!(unit_id, %message, "Work unit panicked. Executor recovered.");
        Err(PoolError::Recovery(message))
      }
    };
    completer.complete(outcome);
  }
}

/// Resolution side of a work unit: the report callback plus the completion
/// signal.
///
/// Resolves at most once. Dropping an unresolved completer resolves the unit
/// as [`PoolError::Cancelled`], which covers units abandoned mid-enqueue.
pub(crate) struct Completer<T, E> {
  unit_id: u64,
  report: Option<ReportFn<T, E>>,
  result_tx: Option<oneshot::Sender<WorkResult<T, E>>>,
}

impl<T, E> Completer<T, E> {
  pub(crate) fn complete(mut self, outcome: WorkResult<T, E>) {
    self.resolve(outcome);
  }

  fn resolve(&mut self, outcome: WorkResult<T, E>) {
    let Some(result_tx) = self.result_tx.take() else {
      return;
    };
    if let Some(report) = self.report.take() {
      if std::panic::catch_unwind(AssertUnwindSafe(|| report(&outcome))).is_err() {
        error!(unit_id = self.unit_id, "Report callback panicked.");
      }
    }
    // The report callback runs before the completion signal fires.
    if result_tx.send(outcome).is_err() {
      trace!(unit_id = self.unit_id, "Wait handle was dropped before the unit resolved.");
    }
  }
}

impl<T, E> Drop for Completer<T, E> {
  fn drop(&mut self) {
    if self.result_tx.is_some() {
      debug!(unit_id = self.unit_id, "Work unit dropped unresolved. Resolving as cancelled.");
      self.resolve(Err(PoolError::Cancelled));
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    warn!("Work unit panicked with a non-string payload.");
    "work unit panicked".to_string()
  }
}

/// Logs the error kind without requiring `E: Display`.
struct ErrKind<'a, E>(&'a PoolError<E>);

impl<E> std::fmt::Display for ErrKind<'_, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      PoolError::PoolClosed => f.write_str("pool closed"),
      PoolError::Cancelled => f.write_str("cancelled"),
      PoolError::Recovery(_) => f.write_str("recovery"),
      PoolError::Work(_) => f.write_str("work error"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  fn counting_report(count: Arc<AtomicUsize>) -> ReportFn<u32, String> {
    Arc::new(move |_outcome: &WorkResult<u32, String>| {
      count.fetch_add(1, AtomicOrdering::SeqCst);
    })
  }

  #[tokio::test]
  async fn test_execute_resolves_with_work_result() {
    let reports = Arc::new(AtomicUsize::new(0));
    let (unit, handle) = WorkUnit::new(
      CancellationToken::new(),
      |_ctx| async { Ok::<u32, String>(7) },
      Some(counting_report(reports.clone())),
    );

    unit.execute().await;
    assert_eq!(reports.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(handle.wait().await, Ok(7));
  }

  #[tokio::test]
  async fn test_dropped_unit_resolves_as_cancelled() {
    let reports = Arc::new(AtomicUsize::new(0));
    let (unit, handle) = WorkUnit::new(
      CancellationToken::new(),
      |_ctx| async { Ok::<u32, String>(1) },
      Some(counting_report(reports.clone())),
    );

    drop(unit);
    assert_eq!(reports.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(handle.wait().await, Err(PoolError::Cancelled));
  }

  #[tokio::test]
  async fn test_panic_in_work_constructor_is_recovered() {
    let (unit, handle) = WorkUnit::<u32, String>::new(
      CancellationToken::new(),
      |_ctx| -> futures::future::Ready<Result<u32, String>> { panic!("bad setup") },
      None,
    );

    unit.execute().await;
    assert_eq!(handle.wait().await, Err(PoolError::Recovery("bad setup".to_string())));
  }

  #[tokio::test]
  async fn test_rejected_unit_reports_once() {
    let reports = Arc::new(AtomicUsize::new(0));
    let (unit, handle) = WorkUnit::new(
      CancellationToken::new(),
      |_ctx| async { Ok::<u32, String>(1) },
      Some(counting_report(reports.clone())),
    );

    unit.reject(PoolError::PoolClosed);
    assert_eq!(reports.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(handle.wait().await, Err(PoolError::PoolClosed));
  }
}
