//! HTTP transport layer.
//!
//! The interceptor chain always terminates at a [`Transport`]: the component
//! that actually puts a request on the wire and returns the response with its
//! body fully read. [`HyperTransport`] is the default implementation, built on
//! hyper_util's legacy client with rustls for HTTPS.
//!
//! A transport may be shared by any number of clients; each holds it behind an
//! `Arc`.
//!
//! # Feature Flags
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use jsonrest_client::transport::{HyperTransport, TlsOptions};
//! use std::sync::Arc;
//!
//! let transport = Arc::new(
//!     HyperTransport::builder()
//!         .tls(&TlsOptions::new().ca_cert_file("/etc/ssl/internal-ca.pem"))?
//!         .build()?,
//! );
//! ```

mod hyper;
mod tls;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::ClientError;

pub use self::hyper::{HyperTransport, HyperTransportBuilder};
pub use self::tls::{build_tls_config, DangerousAcceptAnyCertVerifier, TlsConfig, TlsOptions};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// An outgoing request with its body already encoded.
pub type HttpRequest = http::Request<Bytes>;

/// A response whose body has been read to completion.
pub type HttpResponse = http::Response<Bytes>;

/// Sends a single request and returns the buffered response.
///
/// Implementations must not retry. An error returned here is surfaced to the
/// caller unchanged.
pub trait Transport: Send + Sync + 'static {
    /// Perform one round trip.
    fn round_trip(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ClientError>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn round_trip(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, ClientError>> {
        (**self).round_trip(request)
    }
}
