//! Outbound dialers: connecting either straight to the request target (`direct`) or through a
//! chained upstream proxy speaking HTTP, HTTPS or SOCKS5.

mod direct;
mod http;
mod socks5;

use crate::common::{UpstreamScheme, UpstreamUrl};
use crate::Result;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any stream an outbound dialer can hand back: plain TCP or TLS-wrapped TCP.
pub trait OutboundStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> OutboundStream for T {}

/// How the forward handler must shape the request line once a dial succeeds: a chained HTTP(S)
/// upstream is sent an absolute-form request (and, if credentials are configured, a
/// `Proxy-Authorization` header); direct and SOCKS5 dials land the dialer already connected to
/// the target, so a plain relative-form request is written instead.
pub enum RequestForm {
    Relative,
    Absolute { proxy_authorization: Option<String> },
}

/// Opens a connection suitable for the forward (plain-HTTP request relay) path: spec.md §4.2.
/// `local_addr` is `PolicyOutcome.local_address` (spec.md §3), the outbound bind address the
/// policy callback asked for; `None` lets the OS pick.
pub async fn dial_forward(
    upstream: Option<&UpstreamUrl>,
    ignore_upstream_certificate: bool,
    local_addr: Option<&str>,
    target_host: &str,
    target_port: u16,
) -> Result<(Box<dyn OutboundStream>, RequestForm)> {
    match upstream {
        None => {
            let stream = direct::connect(local_addr, target_host, target_port).await?;
            Ok((Box::new(stream), RequestForm::Relative))
        }
        Some(u) if u.scheme == UpstreamScheme::Http => {
            let stream = http::connect_plain(local_addr, &u.host, u.port).await?;
            let auth = http::basic_auth_header(u.username.as_deref(), u.password.as_deref());
            Ok((Box::new(stream), RequestForm::Absolute { proxy_authorization: auth }))
        }
        Some(u) if u.scheme == UpstreamScheme::Https => {
            let stream = http::connect_tls(local_addr, &u.host, u.port, ignore_upstream_certificate).await?;
            let auth = http::basic_auth_header(u.username.as_deref(), u.password.as_deref());
            Ok((Box::new(stream), RequestForm::Absolute { proxy_authorization: auth }))
        }
        Some(u) => {
            let mut stream = direct::connect(local_addr, &u.host, u.port).await?;
            socks5::handshake(&mut stream, u.username.as_deref(), u.password.as_deref(), target_host, target_port)
                .await?;
            Ok((Box::new(stream), RequestForm::Relative))
        }
    }
}

/// Opens a connection suitable for the CONNECT tunnel path: spec.md §4.3. The returned stream is
/// already established all the way to `target_host:target_port` — piping it is all that's left.
pub async fn dial_tunnel(
    upstream: Option<&UpstreamUrl>,
    ignore_upstream_certificate: bool,
    local_addr: Option<&str>,
    target_host: &str,
    target_port: u16,
) -> Result<Box<dyn OutboundStream>> {
    match upstream {
        None => Ok(Box::new(direct::connect(local_addr, target_host, target_port).await?)),
        Some(u) if u.scheme == UpstreamScheme::Http => {
            let mut stream = http::connect_plain(local_addr, &u.host, u.port).await?;
            let auth = http::basic_auth_header(u.username.as_deref(), u.password.as_deref());
            http::send_connect(&mut stream, target_host, target_port, auth.as_deref()).await?;
            Ok(Box::new(stream))
        }
        Some(u) if u.scheme == UpstreamScheme::Https => {
            let mut stream = http::connect_tls(local_addr, &u.host, u.port, ignore_upstream_certificate).await?;
            let auth = http::basic_auth_header(u.username.as_deref(), u.password.as_deref());
            http::send_connect(&mut stream, target_host, target_port, auth.as_deref()).await?;
            Ok(Box::new(stream))
        }
        Some(u) => {
            let mut stream = direct::connect(local_addr, &u.host, u.port).await?;
            socks5::handshake(&mut stream, u.username.as_deref(), u.password.as_deref(), target_host, target_port)
                .await?;
            Ok(Box::new(stream))
        }
    }
}
