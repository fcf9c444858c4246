use std::sync::{Arc, OnceLock};

use rustls::{ClientConfig, RootCertStore};

use crate::error::Error;

static DEFAULT_CLIENT_CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    RustlsAwsLcRs,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "rustls-ring",
            Self::RustlsAwsLcRs => "rustls-aws-lc-rs",
        }
    }

    /// Backend selected by the enabled cargo features; ring wins when both are on.
    pub const fn compiled() -> Self {
        if cfg!(feature = "tls-rustls-ring") {
            Self::RustlsRing
        } else {
            Self::RustlsAwsLcRs
        }
    }
}

#[cfg(feature = "tls-rustls-ring")]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    feature = "tls-rustls-aws-lc-rs"
))]
fn crypto_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}

pub(crate) fn tls_config_error(backend: TlsBackend, message: impl Into<String>) -> Error {
    Error::TlsConfig {
        backend: backend.as_str(),
        message: message.into(),
    }
}

/// Client config trusting the webpki roots, shared by every https request
/// that does not bring its own config.
pub(crate) fn default_client_config() -> Result<Arc<ClientConfig>, Error> {
    if let Some(config) = DEFAULT_CLIENT_CONFIG.get() {
        return Ok(Arc::clone(config));
    }

    let backend = TlsBackend::compiled();
    let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let mut config = ClientConfig::builder_with_provider(Arc::new(crypto_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|source| tls_config_error(backend, source.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::clone(
        DEFAULT_CLIENT_CONFIG.get_or_init(|| Arc::new(config)),
    ))
}
