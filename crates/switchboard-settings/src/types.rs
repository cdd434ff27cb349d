//! Settings sections.
//!
//! All sections serialize as camelCase and fill missing keys from their
//! `Default` impls, so a partial settings file is always valid.

use serde::{Deserialize, Serialize};
use switchboard_core::logging::LogFormat;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Request tracking and retry.
    pub tracker: TrackerSettings,
    /// Connection registry and janitor.
    pub connections: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl SwitchboardSettings {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.tracker.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "tracker.maxAttempts must be at least 1".into(),
            ));
        }
        if self.tracker.default_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "tracker.defaultTimeoutMs must be positive".into(),
            ));
        }
        if self.tracker.sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "tracker.sweepIntervalMs must be positive".into(),
            ));
        }
        if self.connections.prune_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "connections.pruneIntervalSecs must be positive".into(),
            ));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundBuffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Largest accepted WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Seconds between server pings.
    pub ping_interval_secs: u64,
    /// Seconds without a pong before a socket is closed.
    pub pong_timeout_secs: u64,
    /// Per-socket outbound channel capacity.
    pub outbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_message_size: 16 * 1024 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            outbound_buffer: 1024,
        }
    }
}

/// Delay schedule applied before a timed-out request is retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffMode {
    /// Retry as soon as the timeout has elapsed.
    #[default]
    Fixed,
    /// Add a doubling delay per attempt on top of the timeout.
    Exponential,
}

/// Request tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    /// Deadline for a handler call when the caller gives none.
    pub default_timeout_ms: u64,
    /// Retry budget per request.
    pub max_attempts: u32,
    /// Period of the background retry sweep.
    pub sweep_interval_ms: u64,
    /// Cancel and abort handler tasks that miss their deadline.
    pub cancel_on_timeout: bool,
    /// Retry delay schedule.
    pub backoff: BackoffMode,
    /// First exponential delay.
    pub backoff_initial_ms: u64,
    /// Cap on the exponential delay.
    pub backoff_max_ms: u64,
    /// Seconds a finished request stays queryable before it is evicted.
    pub retention_secs: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_attempts: 3,
            sweep_interval_ms: 1_000,
            cancel_on_timeout: false,
            backoff: BackoffMode::Fixed,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            retention_secs: 3_600,
        }
    }
}

/// Connection registry and janitor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Queue bound per disconnected (scope, client).
    pub max_queued_per_client: usize,
    /// Seconds between janitor runs.
    pub prune_interval_secs: u64,
    /// Seconds a disconnected session is kept before pruning.
    pub stale_after_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_queued_per_client: 1_000,
            prune_interval_secs: 600,
            stale_after_secs: 3_600,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
