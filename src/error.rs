//! Error types for the FMP client library.

use std::sync::Arc;

use thiserror::Error;

/// The main error type for all FMP client operations.
///
/// The type is `Clone` because a failed connect outcome is handed to every
/// caller that races on the same connection attempt, so non-cloneable sources
/// are held behind an [`Arc`].
#[derive(Error, Debug, Clone)]
pub enum FmpError {
    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(Arc<tokio_tungstenite::tungstenite::Error>),

    /// WebSocket communication error (with message)
    #[error("WebSocket error: {0}")]
    WebSocketMsg(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// The server rejected the login frame
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server rejected a subscribe or unsubscribe frame
    #[error("subscription failed: {0}")]
    Subscription(String),

    /// WebSocket connection closed unexpectedly
    #[error("WebSocket connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the closure
        reason: String,
    },

    /// An operation needing a live connection was called while disconnected
    #[error("not connected")]
    NotConnected,

    /// The caller's cancellation token fired before the operation completed
    #[error("operation cancelled")]
    Cancelled,

    /// A configured dial or acknowledgement bound elapsed
    #[error("Request timed out")]
    Timeout,

    /// Missing required credentials
    #[error("Missing credentials: FMP API key required")]
    MissingCredentials,

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The request was rejected before anything was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for FmpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<serde_json::Error> for FmpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl FmpError {
    /// Whether the recovery supervisor may restart the read loop after this error.
    ///
    /// Transport and decode failures are retryable. Cancellation, rejected
    /// credentials and rejected subscriptions are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_)
                | Self::WebSocketMsg(_)
                | Self::Json(_)
                | Self::ConnectionClosed { .. }
                | Self::Timeout
        )
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error came from decoding a malformed frame.
    ///
    /// The socket itself is still usable after a decode error.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Json(_))
    }

    /// Check if this is an authentication rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(FmpError::WebSocketMsg("reset".into()).is_retryable());
        assert!(FmpError::Timeout.is_retryable());
        assert!(
            FmpError::ConnectionClosed {
                reason: "eof".into()
            }
            .is_retryable()
        );

        assert!(!FmpError::Cancelled.is_retryable());
        assert!(!FmpError::Auth("Invalid API KEY".into()).is_retryable());
        assert!(!FmpError::Subscription("denied".into()).is_retryable());
    }

    #[test]
    fn test_decode_error_is_retryable() {
        let err: FmpError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(err.is_decode());
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_is_cloneable() {
        let err: FmpError = tokio_tungstenite::tungstenite::Error::AlreadyClosed.into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_auth_display() {
        let err = FmpError::Auth("Invalid API KEY".into());
        assert!(err.is_auth());
        assert_eq!(err.to_string(), "authentication failed: Invalid API KEY");
    }
}
