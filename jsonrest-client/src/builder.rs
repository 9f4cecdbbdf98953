//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;

use crate::ClientError;
use crate::breaker::{self, BreakerConfig};
use crate::client::Client;
use crate::interceptor::{InterceptorChain, Layer, transport_fn};
use crate::transport::{HyperTransport, TlsOptions, Transport};

/// Request timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for creating a [`Client`].
///
/// # Example
///
/// ```ignore
/// use jsonrest_client::{ClientBuilder, breaker::{BreakerConfig, CommandConfig}};
///
/// let client = ClientBuilder::new("orders.internal:8080")
///     .circuit_breaker(BreakerConfig::new("orders", CommandConfig::default()))
///     .debug()
///     .build()?;
/// ```
pub struct ClientBuilder {
    /// Base address; only its scheme and authority are used.
    base_url: String,
    /// Caller-supplied transport, shared with the caller.
    transport: Option<Arc<dyn Transport>>,
    /// TLS options for the default transport.
    tls: Option<TlsOptions>,
    /// Client-wide request timeout, covering the whole chain.
    timeout: Duration,
    /// Headers sent with every exchange.
    default_headers: HeaderMap,
    /// Breaker command to run every exchange as.
    circuit_breaker: Option<BreakerConfig>,
    debug: bool,
    tracing: bool,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.is_some())
            .field("tls", &self.tls)
            .field("timeout", &self.timeout)
            .field("default_headers", &self.default_headers)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("debug", &self.debug)
            .field("tracing", &self.tracing)
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder with the given base address.
    ///
    /// An address without a scheme, e.g. `"example.com:8080"`, is treated
    /// as `http://`. Any path, query or fragment in it is ignored.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            tls: None,
            timeout: DEFAULT_TIMEOUT,
            default_headers: HeaderMap::new(),
            circuit_breaker: None,
            debug: false,
            tracing: false,
        }
    }

    /// Send requests through this transport instead of the default
    /// [`HyperTransport`].
    ///
    /// Pass an `Arc` to keep using the same transport elsewhere.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Configure TLS for the default transport.
    ///
    /// Cannot be combined with [`transport`](Self::transport); `build` fails
    /// if both are set.
    pub fn tls(mut self, options: TlsOptions) -> Self {
        self.tls = Some(options);
        self
    }

    /// Set the client-wide request timeout (default 5 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the headers sent with every exchange.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Run every exchange as the given breaker command.
    ///
    /// The command is registered process-wide when the client is built,
    /// replacing any earlier command with the same name.
    pub fn circuit_breaker(mut self, config: BreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Dump every request and response to the diagnostic target.
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Record each exchange as a child span of the span in its
    /// [`CallContext`](crate::CallContext).
    pub fn tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    /// The interceptor layers this builder enables, outermost first.
    pub fn layers(&self) -> Vec<Layer> {
        let mut layers = Vec::with_capacity(3);
        if let Some(config) = &self.circuit_breaker {
            layers.push(Layer::CircuitBreaker {
                command: config.name.clone(),
            });
        }
        if self.debug {
            layers.push(Layer::Debug);
        }
        if self.tracing {
            layers.push(Layer::Tracing);
        }
        layers
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if the timeout is zero, the breaker policy is
    ///   invalid, or TLS options are combined with a custom transport
    /// - `ClientError::Tls` if the TLS configuration cannot be built
    pub fn build(self) -> Result<Client, ClientError> {
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be greater than 0".into()));
        }

        let layers = self.layers();

        let transport: Arc<dyn Transport> = match (self.transport, &self.tls) {
            (Some(_), Some(_)) => {
                return Err(ClientError::Config(
                    "cannot apply tls options to a custom transport".into(),
                ));
            }
            (Some(transport), None) => transport,
            (None, Some(options)) => Arc::new(HyperTransport::builder().tls(options)?.build()?),
            (None, None) => Arc::new(HyperTransport::new()?),
        };

        if let Some(config) = &self.circuit_breaker {
            breaker::configure(config)?;
        }

        let round_trip = InterceptorChain::from_layers(&layers).wrap(transport_fn(transport));

        Ok(Client::from_parts(
            self.base_url,
            self.default_headers,
            self.timeout,
            layers,
            round_trip,
        ))
    }
}
