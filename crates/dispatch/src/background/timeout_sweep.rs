//! Fails jobs that outlive their worker's `timeout_minutes`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

/// How often tracked jobs are checked.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the sweep until `cancel` is triggered.
pub async fn run(dispatcher: Arc<Dispatcher>, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Timeout sweep started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Timeout sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let expired = dispatcher.sweep_timeouts(Utc::now()).await;
                if expired > 0 {
                    tracing::warn!(expired, "Timeout sweep: failed stale jobs");
                } else {
                    tracing::debug!("Timeout sweep: nothing expired");
                }
            }
        }
    }
}
