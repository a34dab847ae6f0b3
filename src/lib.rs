//! A Tokio-based fixed-size worker pool with a bounded queue, per-unit
//! cancellation, and a close/reset lifecycle.
//!
//! A [`LimitedPool`] runs `N` executors that pull work units from a queue of
//! capacity `2N`. [`LimitedPool::queue`] returns a [`WaitHandle`] whatever
//! happens to the unit; its `wait` yields the work function's result or a
//! [`PoolError`]. Closing stops the executors and resolves every unit still
//! queued; [`LimitedPool::reset`] brings up a fresh generation of executors.

mod error;
mod executor;
mod handle;
mod pool;
mod work_unit;

pub use error::{PoolError, WorkResult};
pub use handle::WaitHandle;
pub use pool::LimitedPool;
pub use work_unit::ReportFn;
