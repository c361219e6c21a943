//! The policy callback (spec.md §3, §4.1 step 4): the single host-supplied decision point for
//! per-request authentication and routing. Represented as a trait object the same way the
//! teacher represents pluggable outbound behavior (`Arc<dyn OutboundProxy>`), since both are
//! "one interchangeable implementation, chosen once at construction time".

use crate::common::{HeaderList, UpstreamUrl};
use crate::statistic::ConnectionId;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

/// Passed to the policy callback for every request, CONNECT or forward alike
/// (spec.md §4.1 step 4: `{ request, username, password, hostname, port, isHttp, connectionId }`).
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    pub connection_id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub method: String,
    /// `true` for the forward path (plain HTTP absolute-URI request), `false` for CONNECT.
    pub is_http: bool,
    pub hostname: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub request_line: String,
    pub headers: HeaderList,
}

/// Built by `proto::read_request_head` for the forward path only, spec.md §3
/// "RequestContext (forward path)".
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_request_line: String,
    pub method: String,
    pub scheme: String,
    pub target_host: String,
    pub target_port: u16,
    pub path: String,
    pub headers: HeaderList,
    /// Always `false` on the forward path: an HTTPS target is always reached via CONNECT, never
    /// forwarded as a plain-HTTP absolute-URI request.
    pub is_https_target: bool,
}

/// A function yielding a synthesized HTTP response (spec.md §4.4).
#[async_trait]
pub trait CustomResponseProvider: Send + Sync {
    async fn respond(&self) -> Result<CustomResponse>;
}

pub type BoxedResponseFuture = Pin<Box<dyn Future<Output = Result<CustomResponse>> + Send>>;

/// Adapts a plain closure into a [`CustomResponseProvider`].
pub struct CustomResponseFn<F>(pub F);

#[async_trait]
impl<F> CustomResponseProvider for CustomResponseFn<F>
where
    F: Fn() -> BoxedResponseFuture + Send + Sync,
{
    async fn respond(&self) -> Result<CustomResponse> {
        (self.0)().await
    }
}

/// `{ statusCode?, headers?, body? }`, spec.md §4.4. Defaults: `200`, no headers, empty body.
pub struct CustomResponse {
    pub status_code: u16,
    pub headers: HeaderList,
    pub body: ResponseBody,
}

impl Default for CustomResponse {
    fn default() -> Self {
        CustomResponse { status_code: 200, headers: Vec::new(), body: ResponseBody::Empty }
    }
}

/// `body` may be a string, a byte buffer, or a lazy byte stream (spec.md §4.4): the first two
/// get a computed `Content-Length`; the stream variant is sent chunked.
pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    Stream(BoxStream<'static, std::io::Result<Bytes>>),
}

/// Returned from the policy callback per request (spec.md §3 "PolicyOutcome").
pub struct PolicyOutcome {
    pub request_authentication: bool,
    pub upstream_proxy_url: Option<UpstreamUrl>,
    pub ignore_upstream_proxy_certificate: bool,
    pub custom_response: Option<Arc<dyn CustomResponseProvider>>,
    pub local_address: Option<String>,
}

impl Default for PolicyOutcome {
    fn default() -> Self {
        PolicyOutcome {
            request_authentication: false,
            upstream_proxy_url: None,
            ignore_upstream_proxy_certificate: false,
            custom_response: None,
            local_address: None,
        }
    }
}

/// The host-supplied decision point, invoked once per request (CONNECT or forward).
#[async_trait]
pub trait PolicyCallback: Send + Sync {
    async fn decide(&self, request: &PolicyRequest) -> Result<PolicyOutcome>;
}

pub type BoxedPolicyFuture = Pin<Box<dyn Future<Output = Result<PolicyOutcome>> + Send>>;

/// Adapts a plain closure into a [`PolicyCallback`], for callers who don't want to define a type
/// just to implement one async method.
pub struct PolicyFn<F>(pub F);

#[async_trait]
impl<F> PolicyCallback for PolicyFn<F>
where
    F: Fn(&PolicyRequest) -> BoxedPolicyFuture + Send + Sync,
{
    async fn decide(&self, request: &PolicyRequest) -> Result<PolicyOutcome> {
        (self.0)(request).await
    }
}

/// A policy that always routes direct with no authentication — the crate's default when no
/// callback is configured.
pub struct AllowAll;

#[async_trait]
impl PolicyCallback for AllowAll {
    async fn decide(&self, _request: &PolicyRequest) -> Result<PolicyOutcome> {
        Ok(PolicyOutcome::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> PolicyRequest {
        PolicyRequest {
            connection_id: ConnectionId(1),
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
            method: "GET".to_string(),
            is_http: true,
            hostname: "example.com".to_string(),
            port: 80,
            username: None,
            password: None,
            request_line: "GET http://example.com/ HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn allow_all_routes_direct() {
        let outcome = AllowAll.decide(&sample_request()).await.unwrap();
        assert!(!outcome.request_authentication);
        assert!(outcome.upstream_proxy_url.is_none());
    }

    #[tokio::test]
    async fn policy_fn_adapter_invokes_the_closure() {
        let policy = PolicyFn(|_req: &PolicyRequest| -> BoxedPolicyFuture {
            Box::pin(async { Ok(PolicyOutcome { request_authentication: true, ..Default::default() }) })
        });
        let outcome = policy.decide(&sample_request()).await.unwrap();
        assert!(outcome.request_authentication);
    }
}
