use limited_pool::{LimitedPool, ReportFn, WaitHandle, WorkResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

async fn resize_image(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Unit {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 3 {
    return Err(format!("unit {} hit a corrupt image", id));
  }
  Ok(format!("unit {} finished after {}ms", id, delay_ms))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Demo ---");

  let pool = LimitedPool::<String, String>::new(2, Handle::current(), "basic_pool");
  let report: ReportFn<String, String> = Arc::new(|outcome: &WorkResult<String, String>| {
    info!("Report callback saw: {:?}", outcome);
  });

  let mut handles: Vec<WaitHandle<String, String>> = Vec::new();
  for i in 0..5 {
    let sleep_duration: u64 = 300 + (i as u64 % 3 * 200);
    let handle = pool
      .queue(
        CancellationToken::new(),
        move |_ctx| resize_image(i, sleep_duration),
        Some(report.clone()),
      )
      .await;
    info!("Queued unit {} with id {}", i, handle.id());
    handles.push(handle);
  }

  info!("All units queued. Waiting for results...");
  for handle in handles {
    let unit_id = handle.id();
    match handle.wait().await {
      Ok(result) => info!("Result for unit {}: {}", unit_id, result),
      Err(e) => info!("Error for unit {}: {}", unit_id, e),
    }
  }

  pool.close().await;
  info!("--- Basic Usage Demo End ---");
}
