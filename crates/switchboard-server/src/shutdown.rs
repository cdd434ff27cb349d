//! Graceful shutdown of background tasks via `CancellationToken`.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time background tasks get to stop before they are aborted.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the shutdown signal and the handles of the tasks that observe it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no registered tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token that background tasks select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a task to be awaited on shutdown.
    pub fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.lock().push((name.into(), handle));
    }

    /// Number of registered tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait for every registered task.
    ///
    /// Tasks still running after `timeout` are aborted. Returns the
    /// number that had to be aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> usize {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let tasks: Vec<(String, JoinHandle<()>)> = std::mem::take(&mut *self.tasks.lock());
        info!(
            task_count = tasks.len(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for background tasks"
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;
        for (name, mut handle) in tasks {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(task = %name, "task did not stop in time, aborting");
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
