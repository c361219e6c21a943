//! The four handlers the dispatcher can choose between (spec.md §4.1 step 3/6): forward, tunnel,
//! custom-response, or a synthesized error response.

pub mod body;
pub mod custom_response;
pub mod forward;
pub mod tunnel;

use crate::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Writes a minimal synthesized HTTP response carrying a short human-readable reason, used for
/// every pre-response error the dispatcher or a handler needs to report (spec.md §4.2 step 6,
/// §4.6, §7).
pub async fn write_status_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    message: &str,
    extra_headers: &[(&str, &str)],
) -> Result<()> {
    let reason = status_reason(status);
    let mut response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n", message.len());
    for (name, value) in extra_headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(message);
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        407 => "Proxy Authentication Required",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        599 => "Network Connect Timeout Error",
        _ => "Error",
    }
}
