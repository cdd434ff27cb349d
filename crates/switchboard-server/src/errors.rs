//! Handler and server error types.

use metrics_exporter_prometheus::BuildError;

/// Error returned by an [`ActionHandler`](crate::handlers::ActionHandler).
///
/// The tracker turns every variant into a terminal
/// `{success: false, error}` result; the message becomes the `error` text.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload is missing a field or has the wrong shape.
    #[error("Invalid payload: {message}")]
    InvalidPayload {
        /// Description of what is wrong.
        message: String,
    },

    /// The handler body failed.
    #[error("{message}")]
    Failed {
        /// Description.
        message: String,
    },

    /// The handler observed its cancellation token and gave up.
    #[error("Handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Shorthand for [`HandlerError::InvalidPayload`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(err.to_string())
    }
}

/// Errors raised while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// The metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(#[from] BuildError),
}

/// Convenience alias for server results.
pub type Result<T> = std::result::Result<T, ServerError>;
