//! TCP socket setup and dialing, including the outbound bind address a policy outcome may
//! request (spec.md §3 `PolicyOutcome.localAddress`, §4 "outbound bind address").

use crate::{Error, Result};
use socket2::SockRef;
use std::net::SocketAddr;
use tokio::net::{TcpSocket, TcpStream};

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let _ = sock.set_reuse_port(true);
}

/// Resolves `host:port` and connects to the first address that accepts, optionally binding the
/// outbound socket to `local_addr` first (a bare IP, no port) so the connection appears to
/// originate from that address — the mechanism `anonymize::LocalAddressOutbound` rides on.
pub async fn dial_tcp(local_addr: Option<&str>, host: &str, port: u16) -> Result<TcpStream> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::dns(format!("failed to resolve {host}: {e}")))?
        .collect();
    if candidates.is_empty() {
        return Err(Error::dns(format!("no addresses found for {host}")));
    }

    let mut last_err = None;
    for addr in candidates {
        match dial_one(local_addr, addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::connection(format!("failed to connect to {host}:{port}"))))
}

async fn dial_one(local_addr: Option<&str>, addr: SocketAddr) -> Result<TcpStream> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(Error::from)?;

    if let Some(bind_ip) = local_addr {
        let bind_addr: SocketAddr = format!("{bind_ip}:0")
            .parse()
            .map_err(|_| Error::config(format!("invalid outbound bind address: {bind_ip}")))?;
        socket
            .bind(bind_addr)
            .map_err(|e| Error::connection(format!("failed to bind outbound address {bind_ip}: {e}")))?;
    }

    let stream = socket
        .connect(addr)
        .await
        .map_err(|e| Error::connection(format!("failed to connect to {addr}: {e}")))?;
    configure_tcp_stream(&stream);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = dial_tcp(None, "127.0.0.1", addr.port()).await.unwrap();
        let (mut server_side, _) = accept.await.unwrap();
        drop(stream);

        let mut buf = [0u8; 1];
        let n = server_side.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "client should have connected then disconnected cleanly");
    }

    #[tokio::test]
    async fn dials_with_an_explicit_local_bind_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = dial_tcp(Some("127.0.0.1"), "127.0.0.1", addr.port()).await.unwrap();
        let (server_side, peer) = accept.await.unwrap();
        assert_eq!(peer.ip().to_string(), "127.0.0.1");
        drop(stream);
        drop(server_side);
    }

    #[tokio::test]
    async fn rejects_an_unresolvable_host() {
        let err = dial_tcp(None, "this-host-does-not-resolve.invalid", 80).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
