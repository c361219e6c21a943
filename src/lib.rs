//! chainproxy - programmable HTTP(S) forward proxy with upstream chaining over HTTP, HTTPS or
//! SOCKS5.
//!
//! A host process constructs a [`server::ServerConfig`] (see [`config`] for a YAML-backed
//! variant) with a [`policy::PolicyCallback`] that decides, per request, whether to authenticate
//! the client, return a synthesized response, route through an upstream proxy, or forward
//! directly to the origin. [`server::Server::listen`] then accepts connections and dispatches
//! each one to the forward or CONNECT-tunnel handler while accounting for every byte transferred
//! on both sides of the proxy.
//!
//! # Architecture
//!
//! ```text
//!                     +----------------+
//!                     |  server (dispatch) |
//!                     +--------+-------+
//!                              |
//!         +--------------------+--------------------+
//!         |                    |                     |
//!  +------v------+     +-------v-------+     +-------v-------+
//!  |   policy    |     |    handler    |     |   statistic   |
//!  | (callback)  |     | (forward/tun) |     | (registry/ev) |
//!  +-------------+     +-------+-------+     +---------------+
//!                              |
//!                       +------v------+
//!                       |  outbound   |
//!                       | (http/s5)   |
//!                       +-------------+
//! ```

pub mod anonymize;
pub mod auth;
pub mod common;
pub mod config;
pub mod handler;
pub mod outbound;
pub mod policy;
pub mod proto;
pub mod server;
pub mod statistic;
pub mod tls;
pub mod tunnel_helper;

pub use common::error::{Error, Result};
pub use policy::{
    CustomResponse, CustomResponseFn, CustomResponseProvider, PolicyCallback, PolicyFn,
    PolicyOutcome, PolicyRequest, RequestContext, ResponseBody,
};
pub use server::{Server, ServerConfig, ServerType};
pub use statistic::{ConnectionId, ConnectionStats, Event, EventReceiver};

/// Crate version, exposed for embedders that want to report it alongside their own.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
