//! Per-call context: cancellation, deadline and tracing handle.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::ClientError;

/// Caller-supplied context bound to one exchange.
///
/// Cancelling the token or passing the deadline drops the in-flight call,
/// which releases its connection. A span attached here is the parent under
/// which the tracing interceptor records the external call.
///
/// # Example
///
/// ```ignore
/// use jsonrest_client::CallContext;
/// use std::time::Duration;
///
/// let ctx = CallContext::new()
///     .with_timeout(Duration::from_secs(2))
///     .with_span(tracing::info_span!("checkout"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
    span: Option<Span>,
}

impl CallContext {
    /// A context that is never cancelled and carries no trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort the exchange when this token is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Abort the exchange at this instant.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the exchange after this duration from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a trace handle.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The trace handle, if any.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Run `call` until it completes, the token is cancelled, or the deadline
    /// passes, whichever comes first.
    pub(crate) async fn run<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(ClientError::Canceled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(ClientError::DeadlineExceeded);
        }

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(ClientError::Canceled),
            _ = expired => Err(ClientError::DeadlineExceeded),
            result = call => result,
        }
    }
}

/// Trace handle carried in request extensions for the tracing interceptor.
#[derive(Debug, Clone)]
pub(crate) struct TraceHandle(pub(crate) Span);
