//! TLS configuration for the hyper transport.
//!
//! [`build_tls_config`] turns a CA file path and an "accept any certificate"
//! flag into a rustls [`ClientConfig`]:
//!
//! - insecure flag set: a config that skips certificate verification, whether
//!   or not a CA file is given
//! - no CA file: the default roots enabled by feature flags
//! - CA file: a config trusting exactly the PEM certificates in that file
//!
//! # Example
//!
//! ```ignore
//! let config = build_tls_config(&TlsOptions::new().ca_cert_file("ca.pem"))?;
//! assert!(!config.skips_verification());
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use rustls::{ClientConfig, RootCertStore};

use crate::ClientError;

/// TLS options supplied at client construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM file with the certificate authorities to trust.
    pub ca_cert_file: Option<PathBuf>,
    /// Accept any server certificate.
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    /// Create options that use the default roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust only the certificates found in this PEM file.
    pub fn ca_cert_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.ca_cert_file = Some(path.into());
        self
    }

    /// Skip server certificate verification.
    ///
    /// # Warning
    ///
    /// This makes the connection vulnerable to man-in-the-middle attacks.
    /// Use it for development and testing only.
    pub fn insecure_skip_verify(mut self, enabled: bool) -> Self {
        self.insecure_skip_verify = enabled;
        self
    }
}

/// A built TLS configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    config: ClientConfig,
    skip_verify: bool,
    custom_roots: Option<usize>,
}

impl TlsConfig {
    /// The rustls client configuration.
    pub fn client_config(&self) -> &ClientConfig {
        &self.config
    }

    /// Consume this config and return the rustls client configuration.
    pub fn into_client_config(self) -> ClientConfig {
        self.config
    }

    /// Whether server certificate verification is skipped.
    pub fn skips_verification(&self) -> bool {
        self.skip_verify
    }

    /// Number of CA certificates loaded from the CA file, if one was used.
    pub fn custom_root_count(&self) -> Option<usize> {
        self.custom_roots
    }
}

/// Build a TLS configuration from [`TlsOptions`].
///
/// # Errors
///
/// Returns [`ClientError::Tls`] if the CA file cannot be read, contains no
/// parsable PEM certificate, or no crypto provider is available.
pub fn build_tls_config(options: &TlsOptions) -> Result<TlsConfig, ClientError> {
    if options.insecure_skip_verify {
        return Ok(TlsConfig {
            config: danger_accept_invalid_certs_config()?,
            skip_verify: true,
            custom_roots: None,
        });
    }

    let Some(path) = options.ca_cert_file.as_deref() else {
        return Ok(TlsConfig {
            config: default_tls_config()?,
            skip_verify: false,
            custom_roots: None,
        });
    };

    let roots = load_ca_file(path)?;
    let custom_roots = roots.len();
    let config = crypto_provider_builder()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    tracing::debug!(path = %path.display(), roots = custom_roots, "loaded CA certificates");

    Ok(TlsConfig {
        config,
        skip_verify: false,
        custom_roots: Some(custom_roots),
    })
}

/// Read a PEM file into a root store.
///
/// Blocks that fail to parse are skipped; at least one certificate must load.
fn load_ca_file(path: &Path) -> Result<RootCertStore, ClientError> {
    let pem = std::fs::read(path).map_err(|e| {
        ClientError::Tls(format!("failed to read CA file {}: {}", path.display(), e))
    })?;

    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(&pem)
        .filter_map(Result::ok)
        .collect();

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ClientError::Tls(format!(
            "failed to append cert from PEM file: {}",
            path.display()
        )));
    }

    Ok(roots)
}

/// Get a crypto provider ConfigBuilder.
///
/// Priority:
/// 1. Feature-gated provider (tls-ring or tls-aws-lc)
/// 2. User-installed global default provider
fn crypto_provider_builder()
-> Result<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>, ClientError> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = rustls::crypto::CryptoProvider::get_default().cloned();

    let provider = provider.ok_or_else(|| {
        ClientError::Tls(
            "no crypto provider: enable `tls-ring` or `tls-aws-lc`, or install a \
             global provider via `CryptoProvider::install_default()`"
                .into(),
        )
    })?;

    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(format!("unsupported protocol versions: {}", e)))
}

/// Build the default TLS configuration from feature-gated root certificates.
pub(crate) fn default_tls_config() -> Result<ClientConfig, ClientError> {
    Ok(crypto_provider_builder()?
        .with_root_certificates(default_root_store())
        .with_no_client_auth())
}

/// Build the root certificate store from enabled features.
///
/// Native roots win when both root features are enabled.
fn default_root_store() -> RootCertStore {
    #[allow(unused_mut)]
    let mut roots = RootCertStore::empty();

    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // some certs may still have loaded
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    #[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
    tracing::warn!("no root certificate feature enabled; HTTPS servers will fail verification");

    roots
}

/// Build an HTTPS connector that also accepts plain `http://` URLs.
pub(crate) fn build_https_connector(config: ClientConfig) -> HttpsConnector<HttpConnector> {
    HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_all_versions()
        .build()
}

// ============================================================================
// Dangerous: Accept Invalid Certificates
// ============================================================================

/// A certificate verifier that accepts any certificate.
///
/// # Warning
///
/// This is extremely dangerous and should only be used for development/testing!
/// It makes the connection vulnerable to man-in-the-middle attacks.
#[derive(Debug)]
pub struct DangerousAcceptAnyCertVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousAcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Create a TLS config that accepts any certificate (dangerous!).
fn danger_accept_invalid_certs_config() -> Result<ClientConfig, ClientError> {
    Ok(crypto_provider_builder()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertVerifier))
        .with_no_client_auth())
}
