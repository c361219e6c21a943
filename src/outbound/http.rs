//! HTTP/HTTPS upstream dialer: connects to a chained proxy and, for the tunnel path, drives its
//! CONNECT handshake. The forward path reuses `connect_plain`/`connect_tls` directly and builds
//! its own absolute-form request line — see `handler::forward`.

use crate::common::net::dial_tcp;
use crate::{Error, Result};
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn connect_plain(local_addr: Option<&str>, host: &str, port: u16) -> Result<TcpStream> {
    timeout(DIAL_TIMEOUT, dial_tcp(local_addr, host, port))
        .await
        .map_err(|_| Error::timeout(format!("timed out connecting to upstream proxy {host}:{port}")))?
}

pub async fn connect_tls(local_addr: Option<&str>, host: &str, port: u16, skip_cert_verify: bool) -> Result<TlsStream<TcpStream>> {
    let stream = connect_plain(local_addr, host, port).await?;

    let config = if skip_cert_verify {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| Error::tls(format!("invalid upstream proxy server name: {host}")))?;

    timeout(DIAL_TIMEOUT, connector.connect(server_name, stream))
        .await
        .map_err(|_| Error::timeout("timed out during upstream proxy TLS handshake"))?
        .map_err(|e| Error::tls(format!("upstream proxy TLS handshake failed: {e}")))
}

pub fn basic_auth_header(username: Option<&str>, password: Option<&str>) -> Option<String> {
    match (username, password) {
        (Some(user), Some(pass)) => {
            let creds = format!("{user}:{pass}");
            let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
            Some(format!("Basic {encoded}"))
        }
        _ => None,
    }
}

/// Issues `CONNECT host:port` on an already-connected upstream stream and consumes the response
/// headers, leaving the stream ready to be piped. Per spec.md §4.3, only a `200` status succeeds.
pub async fn send_connect<S>(stream: &mut S, host: &str, port: u16, proxy_authorization: Option<&str>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
    if let Some(auth) = proxy_authorization {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::connection(format!("failed to send CONNECT request: {e}")))?;
    stream.flush().await?;

    let mut response = [0u8; 4096];
    let mut total = 0usize;
    loop {
        let n = stream
            .read(&mut response[total..])
            .await
            .map_err(|e| Error::connection(format!("failed to read CONNECT response: {e}")))?;
        if n == 0 {
            return Err(Error::connection("upstream proxy closed the connection during CONNECT"));
        }
        total += n;

        if let Some(header_end) = find_header_end(&response[..total]) {
            let status_line = String::from_utf8_lossy(&response[..header_end]);
            let status_line = status_line.lines().next().unwrap_or("");
            return if status_line.contains(" 200 ") || status_line.trim_end().ends_with(" 200") {
                debug!(%host, port, "upstream proxy CONNECT succeeded");
                Ok(())
            } else if status_line.contains(" 407 ") {
                Err(Error::auth("upstream proxy requires authentication"))
            } else {
                Err(Error::connection(format!("upstream proxy CONNECT failed: {status_line}")))
            };
        }

        if total >= response.len() {
            return Err(Error::connection("upstream proxy CONNECT response too large"));
        }
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Accepts any certificate; used only when a `PolicyOutcome` opts into
/// `ignore_upstream_proxy_certificate` for a chained HTTPS upstream.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_end() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\n"), Some(19));
        assert_eq!(find_header_end(b"incomplete"), None);
    }

    #[test]
    fn auth_header_requires_both_fields() {
        assert!(basic_auth_header(None, None).is_none());
        assert!(basic_auth_header(Some("u"), None).is_none());
        let header = basic_auth_header(Some("user"), Some("pass")).unwrap();
        assert!(header.starts_with("Basic "));
    }
}
