//! Hyper-based HTTP transport.
//!
//! This module provides [`HyperTransport`], the default [`Transport`]
//! implementation using hyper_util's legacy client.

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;

use super::tls::{TlsConfig, TlsOptions, build_https_connector, build_tls_config, default_tls_config};
use super::{HttpRequest, HttpResponse, Transport};
use crate::ClientError;

/// Type alias for the hyper client with HTTPS connector.
type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTP transport using hyper_util's legacy client.
///
/// Supports HTTP/1.1 and HTTP/2 (negotiated via ALPN) over plain TCP or
/// rustls. Cloning is cheap and clones share one connection pool.
///
/// # Example
///
/// ```ignore
/// use jsonrest_client::transport::HyperTransport;
///
/// let transport = HyperTransport::builder().build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    /// Whether certificate verification is disabled.
    skip_verify: bool,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("skip_verify", &self.skip_verify)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a new transport with default settings.
    pub fn new() -> Result<Self, ClientError> {
        Self::builder().build()
    }

    /// Whether this transport accepts any server certificate.
    pub fn skips_verification(&self) -> bool {
        self.skip_verify
    }
}

impl Transport for HyperTransport {
    fn round_trip(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ClientError>> {
        let client = self.client.clone();
        Box::pin(async move {
            let response = client
                .request(request.map(Full::new))
                .await
                .map_err(|e| ClientError::Transport(format!("request failed: {}", e)))?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| ClientError::Transport(format!("failed to read response body: {}", e)))?
                .to_bytes();

            Ok(HttpResponse::from_parts(parts, body))
        })
    }
}

/// Builder for [`HyperTransport`].
///
/// # Example
///
/// ```ignore
/// use jsonrest_client::transport::{HyperTransportBuilder, TlsOptions};
///
/// let transport = HyperTransportBuilder::new()
///     .tls(&TlsOptions::new().ca_cert_file("ca.pem"))?
///     .build()?;
/// ```
#[derive(Default)]
pub struct HyperTransportBuilder {
    /// Custom TLS configuration.
    tls_config: Option<ClientConfig>,
    /// Whether the custom TLS configuration skips verification.
    skip_verify: bool,
}

impl HyperTransportBuilder {
    /// Create a new transport builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom rustls configuration.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self.skip_verify = false;
        self
    }

    /// Build the TLS configuration from options and use it.
    ///
    /// # Errors
    ///
    /// Fails if the CA file cannot be read or holds no certificate.
    pub fn tls(mut self, options: &TlsOptions) -> Result<Self, ClientError> {
        let config: TlsConfig = build_tls_config(options)?;
        self.skip_verify = config.skips_verification();
        self.tls_config = Some(config.into_client_config());
        Ok(self)
    }

    /// Build the transport.
    pub fn build(self) -> Result<HyperTransport, ClientError> {
        let tls_config = match self.tls_config {
            Some(config) => config,
            None => default_tls_config()?,
        };

        let https_connector = build_https_connector(tls_config);

        let mut builder = Client::builder(TokioExecutor::new());

        // idle pooled connections are only expired with a timer
        builder.pool_timer(TokioTimer::new());

        let client = builder.build(https_connector);

        Ok(HyperTransport {
            client,
            skip_verify: self.skip_verify,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls_config", &self.tls_config.is_some())
            .field("skip_verify", &self.skip_verify)
            .finish()
    }
}
