//! Background retry sweep.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::RequestTracker;

/// Spawn the periodic sweep.
///
/// Every `sweep_interval` it claims the open requests whose current
/// attempt outlived its deadline (plus backoff) and retries each in its
/// own task, then evicts requests that finished more than `retention`
/// ago. Exits when `shutdown` is cancelled.
pub fn spawn_sweep(tracker: Arc<RequestTracker>, shutdown: CancellationToken) -> JoinHandle<()> {
    let interval = tracker.config().sweep_interval;
    let retention = tracker.config().retention;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;
        info!(interval_ms = interval.as_millis() as u64, "retry sweep started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = sweep_once(&tracker);
                    let _ = tracker.evict_finished(retention);
                }
            }
        }
        info!("retry sweep stopped");
    })
}

/// Run one sweep pass. Returns the number of retries started.
pub fn sweep_once(tracker: &Arc<RequestTracker>) -> usize {
    let due = tracker.claim_due_retries();
    if due.is_empty() {
        return 0;
    }
    debug!(count = due.len(), "sweep retrying timed-out requests");
    for request_id in &due {
        let tracker = Arc::clone(tracker);
        let request_id = request_id.clone();
        let _ = tokio::spawn(async move {
            let _ = tracker.retry(&request_id).await;
        });
    }
    due.len()
}
