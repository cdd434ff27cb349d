//! Error taxonomy and machine-readable error codes.

// ── Error code constants ────────────────────────────────────────────

/// No handler registered for the (component, action) pair.
pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";
/// The handler body failed or panicked.
pub const HANDLER_EXCEPTION: &str = "HANDLER_EXCEPTION";
/// The handler did not finish before its deadline.
pub const TIMEOUT: &str = "TIMEOUT";
/// The retry budget of a request is exhausted.
pub const MAX_RETRIES_EXCEEDED: &str = "MAX_RETRIES_EXCEEDED";
/// Delivery to a dead connection.
pub const TRANSPORT_FAILURE: &str = "TRANSPORT_FAILURE";
/// Inbound message could not be parsed.
pub const INVALID_ENVELOPE: &str = "INVALID_ENVELOPE";

/// Failures of a tracked handler invocation.
///
/// Every variant except `TransportFailure` is turned into a terminal
/// `{success: false, error}` result by the request tracker; none of them
/// propagate past it. `TransportFailure` never leaves the connection
/// registry, which recovers by queueing the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    /// No handler is registered for the pair.
    #[error("No handler found for component '{component}' action '{action}'")]
    HandlerNotFound {
        /// Component id.
        component: String,
        /// Action name.
        action: String,
    },

    /// The handler returned an error or panicked.
    #[error("{message}")]
    HandlerException {
        /// Message raised by the handler.
        message: String,
    },

    /// The deadline elapsed before the handler finished.
    #[error("Request timed out after {}s", format_secs(*.timeout_ms))]
    Timeout {
        /// Deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// `retry` was called with no attempts left.
    #[error("Maximum retries reached")]
    MaxRetriesExceeded,

    /// The connection's channel is closed.
    #[error("Transport failure for connection '{connection_id}'")]
    TransportFailure {
        /// Id of the dead connection.
        connection_id: String,
    },
}

impl TrackError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => HANDLER_NOT_FOUND,
            Self::HandlerException { .. } => HANDLER_EXCEPTION,
            Self::Timeout { .. } => TIMEOUT,
            Self::MaxRetriesExceeded => MAX_RETRIES_EXCEEDED,
            Self::TransportFailure { .. } => TRANSPORT_FAILURE,
        }
    }
}

/// Render milliseconds as seconds without trailing zeros (`100` → `0.1`).
fn format_secs(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        let secs = format!("{:.3}", ms as f64 / 1000.0);
        secs.trim_end_matches('0').to_owned()
    }
}

/// Errors raised while decoding an inbound envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Not valid JSON, or the `data` block has the wrong shape.
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The `type` field names no known message kind.
    #[error("unknown envelope type '{0}'")]
    UnknownType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_pair() {
        let err = TrackError::HandlerNotFound {
            component: "chart".into(),
            action: "render".into(),
        };
        assert!(err.to_string().starts_with("No handler found"));
        assert!(err.to_string().contains("chart"));
        assert!(err.to_string().contains("render"));
        assert_eq!(err.code(), HANDLER_NOT_FOUND);
    }

    #[test]
    fn timeout_message_uses_seconds() {
        let err = TrackError::Timeout { timeout_ms: 100 };
        assert_eq!(err.to_string(), "Request timed out after 0.1s");
        let err = TrackError::Timeout { timeout_ms: 30_000 };
        assert_eq!(err.to_string(), "Request timed out after 30s");
        let err = TrackError::Timeout { timeout_ms: 1_250 };
        assert_eq!(err.to_string(), "Request timed out after 1.25s");
    }

    #[test]
    fn max_retries_message() {
        assert_eq!(
            TrackError::MaxRetriesExceeded.to_string(),
            "Maximum retries reached"
        );
        assert_eq!(TrackError::MaxRetriesExceeded.code(), MAX_RETRIES_EXCEEDED);
    }

    #[test]
    fn exception_message_is_verbatim() {
        let err = TrackError::HandlerException {
            message: "disk full".into(),
        };
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.code(), HANDLER_EXCEPTION);
    }

    #[test]
    fn envelope_error_display() {
        let err = EnvelopeError::UnknownType("subscribe".into());
        assert_eq!(err.to_string(), "unknown envelope type 'subscribe'");
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(EnvelopeError::from(json_err).to_string().contains("invalid envelope JSON"));
    }
}
