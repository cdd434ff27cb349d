//! Periodic removal of sessions that stayed disconnected too long.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connections::ConnectionRegistry;

/// Spawn the janitor: every `interval`, prune sessions disconnected for at
/// least `stale_after`. Exits when `shutdown` is cancelled.
pub fn spawn_janitor(
    connections: Arc<ConnectionRegistry>,
    interval: Duration,
    stale_after: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = ticker.tick().await;
        info!(
            interval_secs = interval.as_secs(),
            stale_after_secs = stale_after.as_secs(),
            "janitor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = connections.prune_stale(stale_after);
                    debug!(pruned, remaining = connections.session_count(), "janitor pass");
                }
            }
        }
        info!("janitor stopped");
    })
}
