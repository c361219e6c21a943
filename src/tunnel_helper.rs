//! TCP tunnel helper (spec.md §6.4, "collaborator"): binds a local ephemeral listener that
//! tunnels every accepted connection to a fixed target through an upstream proxy via CONNECT.
//! An explicit external collaborator per spec.md §1 — it consumes only `outbound::dial_tunnel`
//! and the byte-pump already used by `handler::tunnel`, never reaching into core internals.
//!
//! SOCKS5 upstreams are rejected: spec.md §6.4 promises HTTP CONNECT only.

use crate::common::buffer::greedy_copy_bidirectional;
use crate::common::{UpstreamScheme, UpstreamUrl};
use crate::outbound;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Optional settings accepted by [`create_tunnel`].
#[derive(Debug, Clone, Default)]
pub struct TunnelOptions {
    /// Address to bind the local listener on. Defaults to `127.0.0.1`.
    pub bind_host: Option<String>,
    /// Skip certificate verification when the upstream proxy itself is `https://`.
    pub ignore_upstream_proxy_certificate: bool,
}

/// A running tunnel returned by [`create_tunnel`]; pass to [`close_tunnel`] to tear it down.
pub struct TunnelHandle {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    accepting: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl TunnelHandle {
    /// The local `host:port` clients should connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Opens a local listener that tunnels every accepted connection to `target_host_port` through
/// `proxy_url` (spec.md §6.4). Rejects a `socks5://` proxy URL with `Error::Unsupported`, and a
/// malformed target with `Error::Config`.
pub async fn create_tunnel(proxy_url: &str, target_host_port: &str, options: Option<TunnelOptions>) -> Result<TunnelHandle> {
    let upstream = UpstreamUrl::parse(proxy_url)?;
    if upstream.scheme == UpstreamScheme::Socks5 {
        return Err(Error::unsupported("tunnel helper supports HTTP CONNECT upstreams only, not SOCKS5"));
    }

    let (target_host, target_port) = target_host_port
        .rsplit_once(':')
        .ok_or_else(|| Error::config("target must be host:port"))?;
    let target_port: u16 = target_port.parse().map_err(|_| Error::config("target has an invalid port"))?;
    let target_host = target_host.to_string();

    let options = options.unwrap_or_default();
    let bind_host = options.bind_host.unwrap_or_else(|| "127.0.0.1".to_string());
    let listener = TcpListener::bind(format!("{bind_host}:0"))
        .await
        .map_err(|e| Error::connection(format!("failed to bind tunnel listener: {e}")))?;
    let local_addr = listener.local_addr().map_err(Error::from)?;

    let shutdown = Arc::new(Notify::new());
    let accepting = Arc::new(AtomicBool::new(true));
    let ignore_cert = options.ignore_upstream_proxy_certificate;

    let task_shutdown = shutdown.clone();
    let task_accepting = accepting.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = task_shutdown.notified() => break,
            };
            let (mut client, peer) = match accepted {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "tunnel helper accept failed");
                    continue;
                }
            };
            if !task_accepting.load(Ordering::Relaxed) {
                break;
            }

            let upstream = upstream.clone();
            let target_host = target_host.clone();
            tokio::spawn(async move {
                let mut target = match outbound::dial_tunnel(Some(&upstream), ignore_cert, None, &target_host, target_port).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!(error = %e, %peer, "tunnel helper dial failed");
                        return;
                    }
                };
                if let Err(e) = greedy_copy_bidirectional(&mut client, &mut target).await {
                    debug!(error = %e, %peer, "tunnel helper pipe ended with an error");
                }
            });
        }
    });

    Ok(TunnelHandle { local_addr, shutdown, accepting, accept_task })
}

/// Tears a tunnel down. `force = true` aborts the accept loop and any in-flight pipe along with
/// it; `force = false` just stops accepting new connections and waits for the accept loop to
/// notice (mirroring `Server::close`'s graceful/forced split).
pub async fn close_tunnel(handle: TunnelHandle, force: bool) {
    handle.accepting.store(false, Ordering::Relaxed);
    handle.shutdown.notify_waiters();
    if force {
        handle.accept_task.abort();
    } else {
        let _ = handle.accept_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_a_socks5_proxy_url() {
        let err = create_tunnel("socks5://proxy.internal:1080", "example.com:80", None).await.unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn rejects_a_malformed_target() {
        let err = create_tunnel("http://proxy.internal:8080", "not-a-host-port", None).await.unwrap_err();
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn binds_a_local_listener_on_an_ephemeral_port() {
        let handle = create_tunnel("http://127.0.0.1:1", "example.com:80", None).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        close_tunnel(handle, true).await;
    }
}
