//! Permissive HTTP/1.x request-line and header parsing, built on `httparse`.

use crate::common::HeaderList;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEAD_SIZE: usize = 64 * 1024;
const READ_CHUNK: usize = 4 * 1024;

/// A fully parsed request line plus headers, spec.md §4.1 step 2.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub uri: String,
    pub headers: HeaderList,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::common::headers::get_header(&self.headers, name)
    }
}

/// Reads and parses one request head from `reader`, returning it alongside any bytes already
/// read past the head boundary (spec.md §4.3 step 3: buffered bytes that must be relayed to the
/// upstream once a CONNECT tunnel is established).
pub async fn read_request_head<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(RequestHead, Vec<u8>)> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut read_chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut read_chunk).await?;
        if n == 0 {
            return Err(Error::parse("connection closed before a complete request head was received"));
        }
        buf.extend_from_slice(&read_chunk[..n]);

        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut header_storage);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = req.method.ok_or_else(|| Error::parse("missing request method"))?.to_string();
                let uri = req.path.ok_or_else(|| Error::parse("missing request target"))?.to_string();
                let headers = req
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                let leftover = buf[head_len..].to_vec();
                return Ok((RequestHead { method, uri, headers }, leftover));
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() >= MAX_HEAD_SIZE {
                    return Err(Error::parse("request head exceeded the maximum allowed size"));
                }
            }
            Err(e) => return Err(Error::parse(format!("malformed request head: {e}"))),
        }
    }
}

/// A parsed HTTP response status line plus headers — used by the forward handler to read the
/// target's response before relaying it (spec.md §4.2 step 4).
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status_code: u16,
    pub reason: String,
    pub headers: HeaderList,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::common::headers::get_header(&self.headers, name)
    }
}

/// Mirrors [`read_request_head`] for the response side of the forward path.
pub async fn read_response_head<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(ResponseHead, Vec<u8>)> {
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut read_chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut read_chunk).await?;
        if n == 0 {
            return Err(Error::connection("upstream closed the connection before a complete response head was received"));
        }
        buf.extend_from_slice(&read_chunk[..n]);

        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut resp = httparse::Response::new(&mut header_storage);
        match resp.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let status_code = resp.code.ok_or_else(|| Error::protocol("missing response status code"))?;
                let reason = resp.reason.unwrap_or("").to_string();
                let headers = resp
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                let leftover = buf[head_len..].to_vec();
                return Ok((ResponseHead { status_code, reason, headers }, leftover));
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() >= MAX_HEAD_SIZE {
                    return Err(Error::protocol("upstream response head exceeded the maximum allowed size"));
                }
            }
            Err(e) => return Err(Error::protocol(format!("malformed upstream response head: {e}"))),
        }
    }
}
