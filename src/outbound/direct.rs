//! Direct dialer: connects straight to the request target, no chaining.

use crate::common::net::dial_tcp;
use crate::Result;
use tokio::net::TcpStream;
use tracing::debug;

pub async fn connect(local_addr: Option<&str>, host: &str, port: u16) -> Result<TcpStream> {
    debug!(host, port, ?local_addr, "dialing direct");
    dial_tcp(local_addr, host, port).await
}
