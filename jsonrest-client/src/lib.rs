//! JSON REST client for Rust.
//!
//! This crate provides a client for calling JSON-over-HTTP services, with
//! optional interceptors wrapped around the transport:
//!
//! - circuit breaking through named, process-wide commands ([`breaker`])
//! - diagnostic dumps of every request and response
//! - tracing spans for each external call
//!
//! ## Example
//!
//! ```ignore
//! use jsonrest_client::{CallContext, Client};
//! use jsonrest_client::breaker::{BreakerConfig, CommandConfig};
//!
//! let client = Client::builder("orders.internal:8080")
//!     .circuit_breaker(BreakerConfig::new("orders", CommandConfig::default()))
//!     .tracing()
//!     .build()?;
//!
//! let mut order = Order::default();
//! let mut problem = Problem::default();
//! let result = client
//!     .post("/api/v1/orders")
//!     .json(&new_order)
//!     .execute(&CallContext::new(), Some(&mut order), Some(&mut problem))
//!     .await;
//!
//! match result {
//!     Ok(()) => println!("created {}", order.id),
//!     Err(err) if err.status().is_some() => println!("rejected: {}", problem.reason),
//!     Err(err) => return Err(err.into()),
//! }
//! ```
//!
//! ## Outcomes
//!
//! A status in `[200, 400)` is a success. Every other status comes back as
//! [`ClientError::Api`] with the status and the raw body, whether or not a
//! failure target was supplied.
//!
//! ## Interceptor Order
//!
//! Interceptors are assembled once when the client is built, outermost
//! first:
//!
//! ```text
//! circuit breaker -> debug -> tracing -> transport
//! ```
//!
//! An open circuit therefore rejects the call before anything is logged or
//! sent.
//!
//! ## Timeouts and Cancellation
//!
//! [`ClientBuilder::timeout`] (default 5 seconds) bounds the whole exchange,
//! response body included. A [`CallContext`] adds a per-call deadline or
//! cancellation token; either one drops the in-flight request.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `tls` (default) | `tls-ring` + `tls-native-roots` |
//! | `tls-ring` | rustls with the ring provider |
//! | `tls-aws-lc` | rustls with the aws-lc-rs provider |
//! | `tls-native-roots` | trust the platform certificate store |
//! | `tls-webpki-roots` | trust the bundled Mozilla roots |

pub mod breaker;
mod builder;
mod client;
mod context;
mod error;
pub mod interceptor;
pub mod transport;

pub use builder::{ClientBuilder, DEFAULT_TIMEOUT};
pub use client::{Client, JSON_CONTENT_TYPE, RequestBuilder};
pub use context::CallContext;
pub use error::{ApiError, ClientError};

// Re-export transport types at the top level for convenience
pub use transport::{HyperTransport, HyperTransportBuilder, TlsOptions, Transport};

pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
