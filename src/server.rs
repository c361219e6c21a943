//! The connection dispatcher (spec.md §4.1) and its public `Server`/`ServerConfig` surface
//! (spec.md §6.1, §6.2). Plain-HTTP and HTTPS listeners share the same post-accept logic in
//! [`dispatch`]; only how the client stream is obtained (and how it is wrapped for byte
//! accounting, spec.md §4.9) differs between [`Server::serve_one`] and
//! [`Server::serve_one_tls`].

use crate::auth::decode_basic;
use crate::common::headers::get_header;
use crate::common::net::configure_tcp_stream;
use crate::handler::{self, write_status_response};
use crate::policy::{PolicyCallback, PolicyOutcome, PolicyRequest, RequestContext};
use crate::proto::read_request_head;
use crate::statistic::registry::new_counters;
use crate::statistic::{ConnectionId, ConnectionRecord, ConnectionRegistry, ConnectionStats, CountingStream, Event, EventBus, EventReceiver};
use crate::tls::HttpsOptions;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    Http,
    Https,
}

/// Constructor configuration, spec.md §6.1.
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub server_type: ServerType,
    pub https_options: Option<HttpsOptions>,
    pub auth_realm: String,
    pub policy: Arc<dyn PolicyCallback>,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 0,
            host: "0.0.0.0".to_string(),
            server_type: ServerType::Http,
            https_options: None,
            auth_realm: "chainproxy".to_string(),
            policy: Arc::new(crate::policy::AllowAll),
            verbose: false,
        }
    }
}

/// The running proxy server: spec.md §6.2 runtime API.
pub struct Server {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    port: std::sync::Mutex<u16>,
    accepting: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    active_connections: Arc<AtomicUsize>,
    drain_notify: Arc<Notify>,
    handles: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let events = EventBus::new();
        Server {
            config,
            registry: Arc::new(ConnectionRegistry::new(events)),
            port: std::sync::Mutex::new(0),
            accepting: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
            active_connections: Arc::new(AtomicUsize::new(0)),
            drain_notify: Arc::new(Notify::new()),
            handles: Arc::new(std::sync::Mutex::new(Vec::new())),
            accept_task: std::sync::Mutex::new(None),
        }
    }

    /// Binds and begins accepting; resolves once the actual port is known (spec.md §6.2 `listen`).
    pub async fn listen(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| Error::connection(format!("failed to bind {addr}: {e}")))?;
        let actual_port = listener.local_addr().map_err(Error::from)?.port();
        *self.port.lock().unwrap() = actual_port;
        info!(port = actual_port, host = %self.config.host, "listening");

        let tls_acceptor = match &self.config.https_options {
            Some(options) => Some(crate::tls::build_acceptor(options)?),
            None => None,
        };

        let registry = self.registry.clone();
        let policy = self.config.policy.clone();
        let auth_realm = self.config.auth_realm.clone();
        let accepting = self.accepting.clone();
        let shutdown = self.shutdown.clone();
        let active = self.active_connections.clone();
        let drain_notify = self.drain_notify.clone();
        let handles = self.handles.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    result = listener.accept() => result,
                    _ = shutdown.notified() => break,
                };

                let (stream, peer_addr) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if !accepting.load(Ordering::Relaxed) {
                    break;
                }
                configure_tcp_stream(&stream);

                let registry = registry.clone();
                let policy = policy.clone();
                let auth_realm = auth_realm.clone();
                let active = active.clone();
                let drain_notify = drain_notify.clone();
                let tls_acceptor = tls_acceptor.clone();

                active.fetch_add(1, Ordering::Relaxed);
                let handle = tokio::spawn(async move {
                    match tls_acceptor {
                        Some(acceptor) => {
                            serve_one_tls(stream, peer_addr, acceptor, registry, policy, auth_realm).await;
                        }
                        None => {
                            serve_one(stream, peer_addr, registry, policy, auth_realm).await;
                        }
                    }
                    active.fetch_sub(1, Ordering::Relaxed);
                    drain_notify.notify_waiters();
                });
                handles.lock().unwrap().push(handle);
            }
        });
        *self.accept_task.lock().unwrap() = Some(accept_task);

        Ok(())
    }

    /// spec.md §6.2 `port`.
    pub fn port(&self) -> u16 {
        *self.port.lock().unwrap()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.registry.connection_ids()
    }

    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        self.registry.connection_stats(id)
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.registry.subscribe()
    }

    /// Stops accepting new connections. `force = false` waits for in-flight connections to
    /// finish; `force = true` aborts them immediately (spec.md §5 "Cancellation").
    pub async fn close(&self, force: bool) {
        self.accepting.store(false, Ordering::Relaxed);
        self.shutdown.notify_waiters();

        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }

        if force {
            for handle in self.handles.lock().unwrap().drain(..) {
                handle.abort();
            }
            self.registry.close_all();
            return;
        }

        while self.active_connections.load(Ordering::Relaxed) > 0 {
            self.drain_notify.notified().await;
        }
    }
}

async fn serve_one(stream: TcpStream, peer_addr: SocketAddr, registry: Arc<ConnectionRegistry>, policy: Arc<dyn PolicyCallback>, auth_realm: String) {
    let (id, record) = registry.register_plain(peer_addr);
    let mut counted = CountingStream::new(stream, record.raw_counters().0, record.raw_counters().1);
    if let Err(e) = dispatch(&mut counted, &record, &policy, &auth_realm).await {
        debug!(connection_id = %id, error = %e, "connection dispatch ended with an error");
        registry.events_request_failed(id, &e);
    }
    registry.close(id);
}

async fn serve_one_tls(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: tokio_rustls::TlsAcceptor,
    registry: Arc<ConnectionRegistry>,
    policy: Arc<dyn PolicyCallback>,
    auth_realm: String,
) {
    let raw_counters = new_counters();
    let raw_counted = CountingStream::new(stream, raw_counters.0.clone(), raw_counters.1.clone());

    let tls_stream = match acceptor.accept(raw_counted).await {
        Ok(s) => s,
        Err(e) => {
            // A failed client TLS handshake is never registered: spec.md §4.1, §7.
            debug!(error = %e, %peer_addr, "client TLS handshake failed");
            return;
        }
    };

    let app_counters = new_counters();
    let (id, record) = registry.register_tls(peer_addr, raw_counters, app_counters.clone());
    let mut counted = CountingStream::new(tls_stream, app_counters.0, app_counters.1);

    if let Err(e) = dispatch(&mut counted, &record, &policy, &auth_realm).await {
        debug!(connection_id = %id, error = %e, "connection dispatch ended with an error");
        registry.events_request_failed(id, &e);
    }
    registry.close(id);
}

/// The post-accept logic shared by plain and TLS listeners: parse the first HTTP message, demux
/// CONNECT vs. forward vs. malformed, run the policy callback, and hand off to the matching
/// handler (spec.md §4.1).
async fn dispatch<C>(client: &mut C, record: &ConnectionRecord, policy: &Arc<dyn PolicyCallback>, auth_realm: &str) -> Result<()>
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (head, leftover) = read_request_head(client).await?;

    if head.method.eq_ignore_ascii_case("CONNECT") {
        let (target_host, target_port) = parse_connect_target(&head.uri)?;

        let credentials = decode_basic(head.header("proxy-authorization")).unwrap_or(None);
        let policy_request = PolicyRequest {
            connection_id: record.id,
            peer_addr: record.client_addr,
            method: head.method.clone(),
            is_http: false,
            hostname: target_host.clone(),
            port: target_port,
            username: credentials.as_ref().map(|c| c.username.clone()),
            password: credentials.as_ref().map(|c| c.password.clone()),
            request_line: format!("{} {} HTTP/1.1", head.method, head.uri),
            headers: head.headers.clone(),
        };

        let outcome = invoke_policy(policy, &policy_request).await?;
        if let Some(status) = rejection_status(&outcome) {
            write_status_response(client, status, "", &proxy_authenticate_header(status, auth_realm)).await?;
            return Ok(());
        }
        if outcome.custom_response.is_some() {
            write_status_response(client, 500, "custom responses are not supported over CONNECT", &[]).await?;
            return Ok(());
        }

        handler::tunnel::run(client, &leftover, &target_host, target_port, &outcome, record).await
    } else if let Some((scheme, host, port, path)) = parse_absolute_uri(&head.uri) {
        let credentials = decode_basic(head.header("proxy-authorization")).unwrap_or(None);
        let policy_request = PolicyRequest {
            connection_id: record.id,
            peer_addr: record.client_addr,
            method: head.method.clone(),
            is_http: true,
            hostname: host.clone(),
            port,
            username: credentials.as_ref().map(|c| c.username.clone()),
            password: credentials.as_ref().map(|c| c.password.clone()),
            request_line: format!("{} {} HTTP/1.1", head.method, head.uri),
            headers: head.headers.clone(),
        };

        let outcome = invoke_policy(policy, &policy_request).await?;
        if let Some(status) = rejection_status(&outcome) {
            write_status_response(client, status, "", &proxy_authenticate_header(status, auth_realm)).await?;
            return Ok(());
        }

        if let Some(provider) = &outcome.custom_response {
            return handler::custom_response::run(client, provider.as_ref()).await;
        }

        let ctx = RequestContext {
            client_request_line: format!("{} {} HTTP/1.1", head.method, head.uri),
            method: head.method.clone(),
            scheme,
            target_host: host,
            target_port: port,
            path,
            headers: head.headers.clone(),
            is_https_target: false,
        };

        handler::forward::run(client, &leftover, &ctx, &outcome, record).await
    } else {
        write_status_response(client, 400, "request target must be an absolute-URI or a CONNECT authority", &[]).await?;
        Err(Error::parse("request target is neither CONNECT nor an absolute-URI"))
    }
}

async fn invoke_policy(policy: &Arc<dyn PolicyCallback>, request: &PolicyRequest) -> Result<PolicyOutcome> {
    policy.decide(request).await
}

/// `requestAuthentication: true` forces a `407` regardless of anything else in the outcome
/// (spec.md §3 "force 407 with ... Authenticate").
fn rejection_status(outcome: &PolicyOutcome) -> Option<u16> {
    if outcome.request_authentication {
        Some(407)
    } else {
        None
    }
}

fn proxy_authenticate_header(status: u16, auth_realm: &str) -> Vec<(&'static str, String)> {
    if status == 407 {
        vec![("Proxy-Authenticate", format!("Basic realm=\"{auth_realm}\""))]
    } else {
        Vec::new()
    }
}

fn parse_connect_target(uri: &str) -> Result<(String, u16)> {
    let (host, port) = uri.rsplit_once(':').ok_or_else(|| Error::parse("CONNECT target must be host:port"))?;
    let port: u16 = port.parse().map_err(|_| Error::parse("CONNECT target has an invalid port"))?;
    Ok((host.to_string(), port))
}

fn parse_absolute_uri(uri: &str) -> Option<(String, String, u16, String)> {
    let url = Url::parse(uri).ok()?;
    let scheme = url.scheme().to_string();
    if scheme != "http" {
        // An HTTPS target is always reached via CONNECT (spec.md §4.2 step 4); a forward-path
        // absolute-URI naming any other scheme is rejected as malformed.
        return None;
    }
    let host = url.host_str()?.to_string();
    let port = url.port().unwrap_or(80);
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    if path.is_empty() {
        path = "/".to_string();
    }
    Some((scheme, host, port, path))
}
