//! Client error types.
//!
//! This module provides [`ClientError`], the error type for every exchange,
//! and [`ApiError`], the payload carried when a server answers with a
//! non-success status.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;

/// A server responded with a status outside `[200, 400)`.
///
/// The raw response body is always preserved. `message` is only populated
/// when the caller asked for the body to be decoded into a failure target and
/// that decode failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    body: Bytes,
    message: Option<String>,
}

impl ApiError {
    /// Create an API error with status and raw body.
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            body,
            message: None,
        }
    }

    /// Attach the message of a failed failure-target decode.
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The HTTP status returned by the server.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The raw response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The decode failure message, if a failure target could not be populated.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status: {}, status code: {}, response body: {}",
            self.status.canonical_reason().unwrap_or("Unknown"),
            self.status.as_u16(),
            String::from_utf8_lossy(&self.body),
        )?;
        if let Some(message) = &self.message {
            write!(f, ", message: {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Error variants for a JSON exchange.
///
/// Nothing is retried or recovered inside the client: every variant is
/// returned to the caller of the exchange as-is.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The request body could not be serialized. No I/O was attempted.
    #[error("encode error: {0}")]
    Encode(String),

    /// The success body could not be parsed into the caller's target.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server answered with a failure status.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Transport-level error (connection refused, DNS, IO).
    #[error("transport error: {0}")]
    Transport(String),

    /// Method, path or headers could not form a valid HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The circuit for this command is open; the call never reached the network.
    #[error("circuit open for command {0:?}")]
    CircuitOpen(String),

    /// The command already has its maximum number of calls in flight.
    #[error("max concurrency reached for command {0:?}")]
    MaxConcurrency(String),

    /// The command did not complete within its configured timeout.
    #[error("command {0:?} timed out")]
    CommandTimeout(String),

    /// The client-wide request timeout elapsed.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The call context deadline passed before the exchange completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The call context was cancelled.
    #[error("request canceled")]
    Canceled,

    /// Invalid client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS configuration could not be built.
    #[error("tls error: {0}")]
    Tls(String),
}

impl ClientError {
    /// Get the API error payload, if this is an API failure.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(api) => Some(api),
            _ => None,
        }
    }

    /// Get the HTTP status, if this is an API failure.
    pub fn status(&self) -> Option<StatusCode> {
        self.as_api().map(ApiError::status)
    }

    /// Returns whether the circuit breaker rejected the call.
    ///
    /// Covers an open circuit and a saturated command. A command timeout is
    /// not a rejection: the call did reach the inner transport.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            ClientError::CircuitOpen(_) | ClientError::MaxConcurrency(_)
        )
    }

    /// Returns whether the exchange was abandoned because of a timeout,
    /// deadline or cancellation.
    ///
    /// The client timeout, the breaker's command timeout
    /// ([`ClientError::CommandTimeout`]), a context deadline and a cancelled
    /// context all count.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_)
                | ClientError::DeadlineExceeded
                | ClientError::Canceled
                | ClientError::CommandTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_accessors() {
        let err = ApiError::new(StatusCode::NOT_FOUND, Bytes::from_static(b"missing"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.body().as_ref(), b"missing");
        assert!(err.message().is_none());

        let err = err.with_message("expected value at line 1 column 1");
        assert_eq!(err.message(), Some("expected value at line 1 column 1"));
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::new(StatusCode::BAD_REQUEST, Bytes::from_static(b"{\"e\":1}"));
        assert_eq!(
            err.to_string(),
            "status: Bad Request, status code: 400, response body: {\"e\":1}"
        );

        let err = err.with_message("boom");
        assert!(err.to_string().ends_with(", message: boom"));
    }

    #[test]
    fn test_client_error_from_api() {
        let err: ClientError =
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()).into();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(err.as_api().is_some());
        assert!(ClientError::Transport("reset".into()).status().is_none());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ClientError::CircuitOpen("cmd".into()).is_rejected());
        assert!(ClientError::MaxConcurrency("cmd".into()).is_rejected());
        assert!(!ClientError::CommandTimeout("cmd".into()).is_rejected());
        assert!(!ClientError::Transport("refused".into()).is_rejected());

        assert!(ClientError::Canceled.is_cancellation());
        assert!(ClientError::DeadlineExceeded.is_cancellation());
        assert!(ClientError::Timeout(Duration::from_secs(1)).is_cancellation());
        assert!(ClientError::CommandTimeout("cmd".into()).is_cancellation());
        assert!(!ClientError::Decode("eof".into()).is_cancellation());
    }
}
