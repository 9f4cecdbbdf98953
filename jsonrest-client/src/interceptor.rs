//! Interceptors wrapping the round trip.
//!
//! An interceptor turns the next [`RoundTripFn`] in the chain into a new one
//! that may observe, delay, short-circuit or annotate the exchange. The chain
//! is assembled once when a client is built, from an ordered list of
//! [`Layer`]s:
//!
//! ```text
//! CircuitBreaker -> Debug -> Tracing -> Transport
//! ```
//!
//! # Example
//!
//! ```ignore
//! use jsonrest_client::interceptor::{InterceptorChain, Layer};
//!
//! let chain = InterceptorChain::from_layers(&[Layer::Debug, Layer::Tracing]);
//! let round_trip = chain.wrap(transport_fn(transport));
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{Instrument, error, field, info, info_span};

use crate::ClientError;
use crate::breaker;
use crate::context::TraceHandle;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Target of diagnostic dump events.
pub const DEBUG_TARGET: &str = "jsonrest_client::debug";

/// Future returned by a [`RoundTripFn`].
pub type RoundTripFuture = BoxFuture<'static, Result<HttpResponse, ClientError>>;

/// The signature of one round trip through the remaining chain.
pub type RoundTripFn = Arc<dyn Fn(HttpRequest) -> RoundTripFuture + Send + Sync>;

/// Adapt a transport into the innermost unit of a chain.
pub fn transport_fn(transport: Arc<dyn Transport>) -> RoundTripFn {
    Arc::new(move |request: HttpRequest| -> RoundTripFuture { transport.round_trip(request) })
}

/// Wraps the next unit of the chain.
pub trait Interceptor: Send + Sync {
    /// Return a unit that runs this interceptor's logic around `next`.
    fn wrap(&self, next: RoundTripFn) -> RoundTripFn;
}

/// One enabled behavior of a client, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    /// Run the exchange as the named breaker command.
    CircuitBreaker {
        /// Registered command name.
        command: String,
    },
    /// Dump requests and responses to the diagnostic target.
    Debug,
    /// Record the exchange as a child span of the caller's span.
    Tracing,
}

impl Layer {
    /// Build the interceptor for this layer.
    pub fn interceptor(&self) -> Arc<dyn Interceptor> {
        match self {
            Layer::CircuitBreaker { command } => Arc::new(CircuitBreakerInterceptor::new(command.clone())),
            Layer::Debug => Arc::new(DebugInterceptor),
            Layer::Tracing => Arc::new(TracingInterceptor),
        }
    }
}

/// A chain of interceptors applied in order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain with one interceptor per layer, outermost first.
    pub fn from_layers(layers: &[Layer]) -> Self {
        Self {
            interceptors: layers.iter().map(Layer::interceptor).collect(),
        }
    }

    /// Append an interceptor. It runs inside every interceptor pushed before it.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Wrap `next` with every interceptor in the chain.
    ///
    /// Interceptors are applied in reverse so the first one pushed is the
    /// first to see the request.
    pub fn wrap(&self, next: RoundTripFn) -> RoundTripFn {
        self.interceptors
            .iter()
            .rev()
            .fold(next, |wrapped, interceptor| interceptor.wrap(wrapped))
    }
}

/// Runs each exchange as a registered breaker command.
///
/// The command is resolved on every call, so reconfiguring the command name
/// takes effect for clients that were built earlier.
#[derive(Debug, Clone)]
pub struct CircuitBreakerInterceptor {
    command: Arc<str>,
}

impl CircuitBreakerInterceptor {
    pub fn new<S: Into<Arc<str>>>(command: S) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Interceptor for CircuitBreakerInterceptor {
    fn wrap(&self, next: RoundTripFn) -> RoundTripFn {
        let command = self.command.clone();
        Arc::new(move |request: HttpRequest| -> RoundTripFuture {
            let next = next.clone();
            let command = command.clone();
            Box::pin(async move {
                let circuit = breaker::lookup(&command).ok_or_else(|| {
                    ClientError::Config(format!("circuit breaker command {command:?} is not configured"))
                })?;
                circuit.run(move || next(request)).await
            })
        })
    }
}

/// Dumps every request and response at `info` level on [`DEBUG_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugInterceptor;

impl Interceptor for DebugInterceptor {
    fn wrap(&self, next: RoundTripFn) -> RoundTripFn {
        Arc::new(move |request: HttpRequest| -> RoundTripFuture {
            let next = next.clone();
            Box::pin(async move {
                info!(target: DEBUG_TARGET, "{}", dump_request(&request));
                let started = Instant::now();
                match next(request).await {
                    Ok(response) => {
                        info!(target: DEBUG_TARGET, "time elapsed: {:?}", started.elapsed());
                        info!(target: DEBUG_TARGET, "{}", dump_response(&response));
                        Ok(response)
                    }
                    Err(err) => {
                        info!(target: DEBUG_TARGET, error = %err, "request failed");
                        Err(err)
                    }
                }
            })
        })
    }
}

/// Records the exchange under the span bound by the caller's context.
///
/// Requests without a bound span pass straight through.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn wrap(&self, next: RoundTripFn) -> RoundTripFn {
        Arc::new(move |request: HttpRequest| -> RoundTripFuture {
            let Some(TraceHandle(parent)) = request.extensions().get::<TraceHandle>().cloned() else {
                return next(request);
            };

            let span = info_span!(
                parent: &parent,
                "http.client",
                http.request.method = %request.method(),
                url.full = %request.uri(),
                http.response.status_code = field::Empty,
                otel.kind = "client",
            );
            let next = next.clone();
            Box::pin(async move {
                let call = span.in_scope(|| next(request));
                let result = call.instrument(span.clone()).await;
                match &result {
                    Ok(response) => {
                        span.record("http.response.status_code", response.status().as_u16());
                    }
                    Err(err) => {
                        span.in_scope(|| error!(error = %err, "external call failed"));
                    }
                }
                result
            })
        })
    }
}

/// Render a request as text: request line, host, headers, then body.
pub fn dump_request(request: &HttpRequest) -> String {
    let uri = request.uri();
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut out = format!("{} {} {:?}\r\n", request.method(), target, request.version());

    let host = request
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()));
    if let Some(host) = host {
        let _ = write!(out, "Host: {host}\r\n");
    }

    write_headers(&mut out, request.headers(), true);
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(request.body()));
    out
}

/// Render a response as text: status line, headers, then body.
pub fn dump_response(response: &HttpResponse) -> String {
    let mut out = format!("{:?} {}\r\n", response.version(), response.status());
    write_headers(&mut out, response.headers(), false);
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(response.body()));
    out
}

fn write_headers(out: &mut String, headers: &http::HeaderMap, skip_host: bool) {
    for (name, value) in headers {
        if skip_host && name == http::header::HOST {
            continue;
        }
        let _ = write!(out, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
}
