use limited_pool::{LimitedPool, PoolError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Close and Reset Demo ---");

  let pool = LimitedPool::<u64, String>::new(1, Handle::current(), "lifecycle_pool");

  // One unit occupies the single executor; the next two wait in the queue.
  let mut handles = Vec::new();
  for i in 0..3u64 {
    handles.push(
      pool
        .queue(
          CancellationToken::new(),
          move |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(i)
          },
          None,
        )
        .await,
    );
  }
  tokio::time::sleep(Duration::from_millis(50)).await;

  info!("Closing pool with {} unit(s) queued.", pool.queued_count().await);
  pool.close().await;

  for handle in handles {
    match handle.wait().await {
      Ok(v) => info!("Unit finished before close took effect: {}", v),
      Err(PoolError::PoolClosed) => info!("Unit was drained by close."),
      Err(e) => info!("Unit failed: {}", e),
    }
  }

  let rejected = pool.queue(CancellationToken::new(), |_ctx| async { Ok(99) }, None).await;
  info!("Queue on closed pool: {:?}", rejected.wait().await);

  pool.reset().await;
  let accepted = pool.queue(CancellationToken::new(), |_ctx| async { Ok(42) }, None).await;
  info!("Queue after reset: {:?}", accepted.wait().await);

  pool.close().await;
  info!("--- Close and Reset Demo End ---");
}
