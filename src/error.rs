use thiserror::Error;

/// Errors surfaced to callers of the `limited_pool` pool.
///
/// `E` is the error type of the submitted work functions. Work errors are
/// carried unmodified in [`PoolError::Work`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError<E> {
  #[error("work unit added or run after the pool had been closed or cancelled")]
  PoolClosed,

  #[error("work unit was cancelled by its context")]
  Cancelled,

  #[error("executor recovered from a fault while running a work unit: {0}")]
  Recovery(String),

  #[error("{0}")]
  Work(E),
}

impl<E> PoolError<E> {
  /// Returns `true` if this error was produced by the pool being closed.
  pub fn is_closed(&self) -> bool {
    matches!(self, PoolError::PoolClosed)
  }

  /// Returns `true` if the caller's own context fired.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, PoolError::Cancelled)
  }

  /// Returns the work function's own error, if that is what this is.
  pub fn into_work_error(self) -> Option<E> {
    match self {
      PoolError::Work(e) => Some(e),
      _ => None,
    }
  }
}

/// The final outcome of a work unit, as seen by `wait` and the report callback.
pub type WorkResult<T, E> = Result<T, PoolError<E>>;
