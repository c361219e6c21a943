//! Proxy authentication (spec.md §4.8): decodes `Proxy-Authorization: Basic <b64>` and leaves the
//! accept/reject decision entirely to the policy callback.

use crate::{Error, Result};
use base64::Engine;

/// Decoded `user:pass` credentials. Everything after the first colon is the password, so a
/// password itself containing colons round-trips correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Parses a `Proxy-Authorization` header value of the form `Basic <base64>`. Returns `None` if
/// the header is absent; both empty username and empty password are valid once decoded.
pub fn decode_basic(header_value: Option<&str>) -> Result<Option<Credentials>> {
    let Some(value) = header_value else { return Ok(None) };
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| Error::auth("unsupported Proxy-Authorization scheme"))?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::auth(format!("invalid Proxy-Authorization base64: {e}")))?;
    let decoded = String::from_utf8(decoded).map_err(|e| Error::auth(format!("invalid Proxy-Authorization utf-8: {e}")))?;

    let (username, password) = match decoded.split_once(':') {
        Some((u, p)) => (u.to_string(), p.to_string()),
        None => (decoded, String::new()),
    };
    Ok(Some(Credentials { username, password }))
}
