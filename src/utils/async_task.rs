use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;

use crate::Result;

/// Sleeps for `duration` unless the stop signal fires first.
///
/// Returns false when the sleep was interrupted by the stop signal.
pub(crate) async fn sleep_or_stop(
    duration: Duration,
    stop: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// Helper function to spawn tasks and track their JoinHandles
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
    handles: Option<&mut Vec<JoinHandle<()>>>,
) where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    // Clone the name so it can be safely moved into the async block
    let name = name.to_string();
    let handle = tokio::spawn(async move {
        match task_fn().await {
            Ok(()) => debug!(task = %name, "spawned task stopped"),
            Err(e) => error!(task = %name, "spawned task stopped with error: {:?}", e),
        }
    });

    if let Some(h) = handles {
        h.push(handle);
    }
}
