//! Tracked request records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use switchboard_core::{HandlerResult, Origin};
use tokio::time::Instant;

/// Lifecycle state of a tracked request.
///
/// `Pending → Completed | Error`, or `Pending → Retrying → … → Completed | Error`.
/// Nothing leaves `Completed` or `Error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// First attempt in flight or timed out awaiting retry.
    Pending,
    /// A retry is in flight or timed out awaiting the next one.
    Retrying,
    /// The handler succeeded.
    Completed,
    /// The handler failed, was missing, or the retry budget ran out.
    Error,
}

impl RequestStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// One tracked handler invocation and its retry state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    /// Unique id.
    pub request_id: String,
    /// Target component.
    pub component: String,
    /// Invoked action.
    pub action: String,
    /// Payload replayed on every attempt.
    pub payload: Value,
    /// Connection the request came from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last state change.
    pub updated_at: DateTime<Utc>,
    /// Per-attempt deadline.
    #[serde(rename = "timeoutMs", serialize_with = "serialize_millis")]
    pub timeout: Duration,
    /// Retries performed so far (`0` on the first attempt).
    pub attempt: u32,
    /// Retry budget.
    pub max_attempts: u32,
    /// Current status.
    pub status: RequestStatus,
    /// Latest outcome; final once the status is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<HandlerResult>,
    /// When the current attempt started (monotonic, for the sweep).
    #[serde(skip)]
    pub(crate) attempt_started: Instant,
    /// When the request reached a terminal status (monotonic, for eviction).
    #[serde(skip)]
    pub(crate) settled_at: Option<Instant>,
}

impl PendingRequest {
    pub(crate) fn new(
        request_id: String,
        component: String,
        action: String,
        payload: Value,
        origin: Option<Origin>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            component,
            action,
            payload,
            origin,
            created_at: now,
            updated_at: now,
            timeout,
            attempt: 0,
            max_attempts,
            status: RequestStatus::Pending,
            result: None,
            attempt_started: Instant::now(),
            settled_at: None,
        }
    }

    /// Whether `retry` would still invoke the handler.
    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Time since the current attempt started.
    pub fn attempt_age(&self) -> Duration {
        self.attempt_started.elapsed()
    }

    /// Time since the request reached a terminal status.
    pub fn finished_for(&self) -> Option<Duration> {
        self.settled_at.map(|at| at.elapsed())
    }

    pub(crate) fn settle(&mut self, status: RequestStatus, result: HandlerResult) {
        self.status = status;
        self.result = Some(result);
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.settled_at = Some(Instant::now());
        }
    }

    pub(crate) fn begin_retry(&mut self) {
        self.attempt += 1;
        self.status = RequestStatus::Retrying;
        self.updated_at = Utc::now();
        self.attempt_started = Instant::now();
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
