//! Request/response body relaying: known-length, chunked, and close-delimited framing, streamed
//! without ever buffering a full body in memory (spec.md §4.2 step 3: "A large streamed POST
//! must never be buffered in full").

use crate::common::HeaderList;
use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const COPY_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body at all (e.g. a request with neither `Content-Length` nor `Transfer-Encoding`).
    None,
    Length(u64),
    Chunked,
    /// No framing header present, body runs until the sender closes the connection (RFC 7230
    /// §3.3.3 rule 7 — legal only on the response side, for a bodyless response caller
    /// `response_framing_of` never returns this).
    UntilClose,
}

/// Per RFC 7230 §3.3.3: `Transfer-Encoding: chunked` takes priority over `Content-Length` when
/// both are present.
pub fn framing_of(headers: &HeaderList) -> BodyFraming {
    if let Some(te) = crate::common::headers::get_header(headers, "transfer-encoding") {
        if te.to_ascii_lowercase().contains("chunked") {
            return BodyFraming::Chunked;
        }
    }
    if let Some(len) = crate::common::headers::get_header(headers, "content-length") {
        if let Ok(n) = len.trim().parse::<u64>() {
            return BodyFraming::Length(n);
        }
    }
    BodyFraming::None
}

/// `framing_of` specialized for a response: per RFC 7230 §3.3.3, a response to `HEAD`, a `1xx`,
/// `204`, or `304` never has a body regardless of what its headers claim, and — unlike a
/// request — a response with neither `Content-Length` nor `Transfer-Encoding` is not bodyless:
/// its body is delimited by the sender closing the connection (spec.md §4.2 step 4 relays
/// exactly what the upstream sent; dropping an unframed body would silently truncate it).
pub fn response_framing_of(request_method: &str, status_code: u16, headers: &HeaderList) -> BodyFraming {
    if request_method.eq_ignore_ascii_case("HEAD") || status_code == 204 || status_code == 304 || (100..200).contains(&status_code) {
        return BodyFraming::None;
    }
    match framing_of(headers) {
        BodyFraming::None => BodyFraming::UntilClose,
        other => other,
    }
}

/// An `AsyncRead` that yields `prefix` first, then falls through to `inner` — used to splice
/// bytes the head parser already consumed from the socket back in front of the body stream.
pub struct PrefixedReader<'a, R> {
    prefix: &'a [u8],
    pos: usize,
    inner: &'a mut R,
}

impl<'a, R> PrefixedReader<'a, R> {
    pub fn new(prefix: &'a [u8], inner: &'a mut R) -> Self {
        Self { prefix, pos: 0, inner }
    }
}

impl<'a, R: AsyncRead + Unpin> AsyncRead for PrefixedReader<'a, R> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pos < self.prefix.len() {
            let remaining = &self.prefix[self.pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.pos += n;
            return std::task::Poll::Ready(Ok(()));
        }
        std::pin::Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

/// Relays a body of the given framing from `reader` to `writer`, bounded-memory.
pub async fn relay_body<R, W>(reader: &mut R, writer: &mut W, framing: BodyFraming) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match framing {
        BodyFraming::None => Ok(()),
        BodyFraming::Length(len) => relay_known_length(reader, writer, len).await,
        BodyFraming::Chunked => relay_chunked(reader, writer).await,
        BodyFraming::UntilClose => relay_until_close(reader, writer).await,
    }
}

/// Relays bytes until `reader` hits EOF, for a close-delimited response body (RFC 7230 §3.3.3
/// rule 7). Unlike `relay_known_length`, a zero-byte read here is the expected end of body, not
/// an error.
async fn relay_until_close<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}

async fn relay_known_length<R, W>(reader: &mut R, writer: &mut W, mut remaining: u64) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; COPY_CHUNK];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::protocol("connection closed before the declared body length was read"));
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Relays chunked-encoded bytes through unmodified: only the chunk-size lines are parsed (to
/// know where the stream ends), the wire bytes themselves are never re-encoded.
async fn relay_chunked<R, W>(reader: &mut R, writer: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = read_line(reader).await?;
        writer.write_all(&line).await?;

        let size_str = std::str::from_utf8(&line)
            .map_err(|_| Error::protocol("invalid chunk size line"))?
            .trim_end()
            .split(';')
            .next()
            .unwrap_or("");
        let size = u64::from_str_radix(size_str.trim(), 16)
            .map_err(|_| Error::protocol(format!("invalid chunk size: {size_str}")))?;

        if size == 0 {
            // Trailer section: zero or more header lines, terminated by a blank line.
            loop {
                let trailer_line = read_line(reader).await?;
                writer.write_all(&trailer_line).await?;
                if trailer_line == b"\r\n" {
                    break;
                }
            }
            return Ok(());
        }

        relay_known_length(reader, writer, size).await?;
        // Trailing CRLF after each chunk's data.
        let crlf = read_line(reader).await?;
        writer.write_all(&crlf).await?;
    }
}

async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::protocol("connection closed mid-chunk"));
        }
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            return Ok(line);
        }
        if line.len() > 8 * 1024 {
            return Err(Error::protocol("chunk size line too long"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relays_known_length_body() {
        let mut reader = std::io::Cursor::new(b"hello world".to_vec());
        let mut out = Vec::new();
        relay_body(&mut reader, &mut out, BodyFraming::Length(11)).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn relays_chunked_body_verbatim() {
        let input = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let mut reader = std::io::Cursor::new(input.clone());
        let mut out = Vec::new();
        relay_body(&mut reader, &mut out, BodyFraming::Chunked).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn relays_until_close_for_an_unframed_body() {
        let mut reader = std::io::Cursor::new(b"no content-length here".to_vec());
        let mut out = Vec::new();
        relay_body(&mut reader, &mut out, BodyFraming::UntilClose).await.unwrap();
        assert_eq!(out, b"no content-length here");
    }

    #[test]
    fn response_framing_treats_missing_headers_as_until_close() {
        let headers: HeaderList = Vec::new();
        assert_eq!(response_framing_of("GET", 200, &headers), BodyFraming::UntilClose);
    }

    #[test]
    fn response_framing_is_bodyless_for_head_and_204_304_1xx() {
        let headers: HeaderList = Vec::new();
        assert_eq!(response_framing_of("HEAD", 200, &headers), BodyFraming::None);
        assert_eq!(response_framing_of("GET", 204, &headers), BodyFraming::None);
        assert_eq!(response_framing_of("GET", 304, &headers), BodyFraming::None);
        assert_eq!(response_framing_of("GET", 101, &headers), BodyFraming::None);
    }

    #[test]
    fn response_framing_prefers_explicit_length_over_until_close() {
        let headers: HeaderList = vec![("Content-Length".to_string(), "5".to_string())];
        assert_eq!(response_framing_of("GET", 200, &headers), BodyFraming::Length(5));
    }

    #[tokio::test]
    async fn prefixed_reader_yields_prefix_then_inner() {
        let mut inner = std::io::Cursor::new(b"world".to_vec());
        let mut reader = PrefixedReader::new(b"hello ", &mut inner);
        let mut buf = [0u8; 11];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }
}
