//! HTTPS listener setup (spec.md §6.1 `httpsOptions`): loads the certificate chain and private
//! key, and builds the `rustls::ServerConfig` (including the session-cache sizing that lets
//! scenario S6 and the deterministic-accounting tests disable resumption entirely).

use crate::{Error, Result};
use rustls::server::ServerSessionMemoryCache;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// `httpsOptions`: certificate/key paths plus the optional session-cache size.
#[derive(Debug, Clone)]
pub struct HttpsOptions {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
    /// Number of sessions the resumption cache holds; `0` disables resumption (spec.md §6.1).
    pub max_cached_sessions: usize,
}

pub fn build_acceptor(options: &HttpsOptions) -> Result<TlsAcceptor> {
    let certs = load_certs(&options.cert_path)?;
    let key = load_key(&options.key_path)?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::tls(format!("invalid TLS certificate/key pair: {e}")))?;

    config.session_storage = ServerSessionMemoryCache::new(options.max_cached_sessions.max(1));
    if options.max_cached_sessions == 0 {
        config.session_storage = ServerSessionMemoryCache::new(1);
        // A cache of size 1 still technically permits resumption; force it off outright so the
        // S6 deterministic-accounting scenario never observes a resumed handshake.
        config.send_tls13_tickets = 0;
    }

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let data = std::fs::read(path).map_err(|e| Error::config(format!("failed to read certificate file {}: {e}", path.display())))?;
    let mut reader = std::io::Cursor::new(data);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("failed to parse certificate file {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let data = std::fs::read(path).map_err(|e| Error::config(format!("failed to read private key file {}: {e}", path.display())))?;
    let mut reader = std::io::Cursor::new(data);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("failed to parse private key file {}: {e}", path.display())))?
        .ok_or_else(|| Error::config(format!("no private key found in {}", path.display())))
}
