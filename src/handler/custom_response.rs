//! Custom-response emitter (spec.md §4.4): lets the policy callback synthesize a response
//! instead of routing the request anywhere. Always closes the connection once written.

use crate::policy::{CustomResponse, CustomResponseProvider, ResponseBody};
use crate::Result;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

pub async fn run<W: AsyncWrite + Unpin>(writer: &mut W, provider: &dyn CustomResponseProvider) -> Result<()> {
    let response = match provider.respond().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "custom response callback failed");
            super::write_status_response(writer, 500, &e.to_string(), &[]).await?;
            return Ok(());
        }
    };

    match response.body {
        ResponseBody::Empty => write_fixed_length(writer, response.status_code, &response.headers, &[]).await,
        ResponseBody::Bytes(bytes) => write_fixed_length(writer, response.status_code, &response.headers, &bytes).await,
        ResponseBody::Stream(stream) => write_chunked(writer, response.status_code, &response.headers, stream).await,
    }
}

async fn write_fixed_length<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status_code: u16,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<()> {
    let mut head = format!("HTTP/1.1 {status_code} {}\r\n", reason(status_code));
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

async fn write_chunked<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status_code: u16,
    headers: &[(String, String)],
    mut stream: futures::stream::BoxStream<'static, std::io::Result<bytes::Bytes>>,
) -> Result<()> {
    let mut head = format!("HTTP/1.1 {status_code} {}\r\n", reason(status_code));
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n");
    writer.write_all(head.as_bytes()).await?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        writer.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await?;
        writer.write_all(&chunk).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"0\r\n\r\n").await?;
    writer.flush().await?;
    Ok(())
}

fn reason(status_code: u16) -> &'static str {
    match status_code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedProvider(u16, &'static str);

    #[async_trait]
    impl CustomResponseProvider for FixedProvider {
        async fn respond(&self) -> Result<CustomResponse> {
            Ok(CustomResponse {
                status_code: self.0,
                headers: vec![("X-Test".to_string(), "yes".to_string())],
                body: ResponseBody::Bytes(self.1.as_bytes().to_vec()),
            })
        }
    }

    #[tokio::test]
    async fn writes_a_fixed_length_response() {
        let provider = FixedProvider(201, "hello");
        let mut out = Vec::new();
        run(&mut out, &provider).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    struct FailingProvider;

    #[async_trait]
    impl CustomResponseProvider for FailingProvider {
        async fn respond(&self) -> Result<CustomResponse> {
            Err(crate::Error::internal("boom"))
        }
    }

    #[tokio::test]
    async fn synthesizes_500_on_callback_failure() {
        let mut out = Vec::new();
        run(&mut out, &FailingProvider).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 500"));
    }
}
