//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener, socket and janitor tunables of a
/// [`SwitchboardServer`](crate::server::SwitchboardServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Seconds between server Ping frames.
    pub ping_interval_secs: u64,
    /// Seconds without a Pong before a socket is closed.
    pub pong_timeout_secs: u64,
    /// Per-socket outbound channel capacity.
    pub outbound_buffer: usize,
    /// Bound of each disconnected client's message queue.
    pub max_queued_per_client: usize,
    /// Seconds between janitor runs.
    pub prune_interval_secs: u64,
    /// Seconds a disconnected session is kept.
    pub stale_after_secs: u64,
}

impl ServerConfig {
    /// Ping interval as a duration.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a duration.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Janitor period as a duration.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    /// Prune threshold as a duration.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            outbound_buffer: 1024,
            max_queued_per_client: 1_000,
            prune_interval_secs: 600,
            stale_after_secs: 3_600,
        }
    }
}
