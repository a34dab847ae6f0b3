use crate::error::{PoolError, WorkResult};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A handle to a work unit submitted to a [`LimitedPool`](crate::LimitedPool).
///
/// Returned by every `queue` call, whether the unit was accepted or not.
#[derive(Debug)]
pub struct WaitHandle<T, E> {
  pub(crate) unit_id: u64,
  pub(crate) ctx: CancellationToken,
  pub(crate) result_receiver: oneshot::Receiver<WorkResult<T, E>>,
}

impl<T, E> WaitHandle<T, E> {
  /// Returns the unique ID of the work unit.
  pub fn id(&self) -> u64 {
    self.unit_id
  }

  /// Waits for the work unit's outcome.
  ///
  /// Completes with the work function's result, or with the error the pool
  /// resolved the unit with. If the unit's context is cancelled first, returns
  /// `PoolError::Cancelled` immediately; the work may still be running and its
  /// result is discarded.
  ///
  /// # Errors
  /// Returns `PoolError::Work` with the work function's own error.
  /// Returns `PoolError::PoolClosed` if the unit was rejected or drained by a close.
  /// Returns `PoolError::Cancelled` if the unit's context fired first.
  /// Returns `PoolError::Recovery` if the work function panicked.
  pub async fn wait(self) -> WorkResult<T, E> {
    let WaitHandle {
      unit_id,
      ctx,
      result_receiver,
    } = self;

    tokio::select! {
      biased;

      outcome = result_receiver => match outcome {
        Ok(outcome) => outcome,
        Err(recv_error) => {
          tracing::warn!(unit_id, "Completion signal closed without a result: {}", recv_error);
          Err(PoolError::Recovery(format!(
            "work unit (id: {}) completion signal closed without a result",
            unit_id
          )))
        }
      },

      _ = ctx.cancelled() => {
        tracing::debug!(unit_id, "Wait abandoned: unit context cancelled.");
        Err(PoolError::Cancelled)
      }
    }
  }
}
