//! TLS acceptor construction from PEM files.

use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No certificates in {0}")]
    NoCerts(String),
    #[error("No private key in {0}")]
    NoKey(String),
    #[error("TLS config rejected: {0}")]
    Config(#[from] tokio_rustls::rustls::Error),
}

/// Build an acceptor from a certificate chain and key. Called at
/// startup and again on SIGHUP to pick up renewed certificates.
pub fn load_acceptor(certfile: &Path, keyfile: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(certfile)?))
            .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCerts(certfile.display().to_string()));
    }
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(keyfile)?))?
            .ok_or_else(|| TlsError::NoKey(keyfile.display().to_string()))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
