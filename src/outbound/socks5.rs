//! SOCKS5 client handshake (RFC 1928) with username/password authentication (RFC 1929), used to
//! reach a chained SOCKS5 upstream for both the forward and tunnel paths.

use crate::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const SOCKS5_VERSION: u8 = 0x05;

const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
const REP_NETWORK_UNREACHABLE: u8 = 0x03;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_TTL_EXPIRED: u8 = 0x06;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Drives the full SOCKS5 CONNECT handshake over an already-connected stream, leaving it ready
/// to carry `host:port`'s traffic directly (no further framing).
pub async fn handshake<S>(
    stream: &mut S,
    username: Option<&str>,
    password: Option<&str>,
    host: &str,
    port: u16,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = vec![SOCKS5_VERSION];
    if username.is_some() && password.is_some() {
        greeting.extend_from_slice(&[2, AUTH_NONE, AUTH_PASSWORD]);
    } else {
        greeting.extend_from_slice(&[1, AUTH_NONE]);
    }
    stream
        .write_all(&greeting)
        .await
        .map_err(|e| Error::connection(format!("failed to send SOCKS5 greeting: {e}")))?;

    let mut chosen = [0u8; 2];
    stream
        .read_exact(&mut chosen)
        .await
        .map_err(|e| Error::connection(format!("failed to read SOCKS5 method selection: {e}")))?;
    if chosen[0] != SOCKS5_VERSION {
        return Err(Error::protocol("invalid SOCKS5 version in method selection"));
    }

    match chosen[1] {
        AUTH_NONE => {}
        AUTH_PASSWORD => authenticate(stream, username, password).await?,
        AUTH_NO_ACCEPTABLE => return Err(Error::auth("SOCKS5 upstream rejected all authentication methods")),
        other => return Err(Error::protocol(format!("unsupported SOCKS5 authentication method: {other}"))),
    }

    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    encode_address(&mut request, host)?;
    request.extend_from_slice(&port.to_be_bytes());

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::connection(format!("failed to send SOCKS5 connect request: {e}")))?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::connection(format!("failed to read SOCKS5 connect reply: {e}")))?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Error::protocol("invalid SOCKS5 version in connect reply"));
    }
    if reply[1] != REP_SUCCESS {
        return Err(Error::connection(reply_error_message(reply[1])));
    }

    match reply[3] {
        ATYP_IPV4 => {
            let mut skip = [0u8; 6];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_IPV6 => {
            let mut skip = [0u8; 18];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut skip = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut skip).await?;
        }
        other => return Err(Error::protocol(format!("invalid address type in SOCKS5 connect reply: {other}"))),
    }

    debug!(host, port, "SOCKS5 upstream connected");
    Ok(())
}

async fn authenticate<S>(stream: &mut S, username: Option<&str>, password: Option<&str>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = username.ok_or_else(|| Error::auth("SOCKS5 username required"))?;
    let password = password.ok_or_else(|| Error::auth("SOCKS5 password required"))?;
    if username.len() > 255 || password.len() > 255 {
        return Err(Error::auth("SOCKS5 username or password too long"));
    }

    let mut request = vec![0x01u8];
    request.push(username.len() as u8);
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(Error::auth("SOCKS5 upstream rejected username/password authentication"));
    }
    Ok(())
}

fn encode_address(out: &mut Vec<u8>, host: &str) -> Result<()> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        out.push(ATYP_IPV4);
        out.extend_from_slice(&ip.octets());
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        out.push(ATYP_IPV6);
        out.extend_from_slice(&ip.octets());
    } else {
        if host.len() > 255 {
            return Err(Error::address("SOCKS5 domain name too long"));
        }
        out.push(ATYP_DOMAIN);
        out.push(host.len() as u8);
        out.extend_from_slice(host.as_bytes());
    }
    Ok(())
}

fn reply_error_message(code: u8) -> String {
    match code {
        REP_GENERAL_FAILURE => "general SOCKS server failure".to_string(),
        REP_CONNECTION_NOT_ALLOWED => "connection not allowed by ruleset".to_string(),
        REP_NETWORK_UNREACHABLE => "network unreachable".to_string(),
        REP_HOST_UNREACHABLE => "host unreachable".to_string(),
        REP_CONNECTION_REFUSED => "connection refused".to_string(),
        REP_TTL_EXPIRED => "TTL expired".to_string(),
        REP_COMMAND_NOT_SUPPORTED => "command not supported".to_string(),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported".to_string(),
        other => format!("unknown SOCKS5 error: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_error_messages_known_codes() {
        assert_eq!(reply_error_message(REP_CONNECTION_REFUSED), "connection refused");
        assert_eq!(reply_error_message(REP_HOST_UNREACHABLE), "host unreachable");
    }

    #[test]
    fn encodes_ipv4_and_domain_addresses() {
        let mut buf = Vec::new();
        encode_address(&mut buf, "127.0.0.1").unwrap();
        assert_eq!(buf, vec![ATYP_IPV4, 127, 0, 0, 1]);

        let mut buf = Vec::new();
        encode_address(&mut buf, "example.com").unwrap();
        assert_eq!(buf[0], ATYP_DOMAIN);
        assert_eq!(buf[1], 11);
    }
}
