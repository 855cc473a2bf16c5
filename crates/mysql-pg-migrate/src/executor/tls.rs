//! TLS setup for the PostgreSQL target pool.

use std::sync::Arc;

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// SSL modes accepted for the target connection.
///
/// These follow PostgreSQL's `sslmode` names. Whenever TLS is negotiated the
/// server certificate is verified against the webpki root store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    Disable,
    /// TLS when the server offers it, plain TCP otherwise.
    #[default]
    Prefer,
    /// TLS or fail.
    Require,
}

impl SslMode {
    /// Parse an SSL mode from a string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" | "" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            other => Err(MigrateError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, prefer, require",
                other
            ))),
        }
    }

    /// Check if this mode may negotiate TLS.
    pub fn uses_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    pub(crate) fn as_pg(&self) -> tokio_postgres::config::SslMode {
        match self {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require => tokio_postgres::config::SslMode::Require,
        }
    }
}

/// Build the rustls connector for the target pool. `None` when TLS is disabled.
pub(crate) fn connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    if !mode.uses_tls() {
        warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
        return Ok(None);
    }

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MigrateError::Config(format!("building TLS configuration: {}", e)))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    info!("ssl_mode={:?}: server certificate verification enabled", mode);
    Ok(Some(MakeRustlsConnect::new(config)))
}
