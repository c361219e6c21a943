//! Forward handler (spec.md §4.2): proxies a plain-HTTP absolute-URI request, optionally via a
//! chained upstream, streaming request and response bodies without buffering them in full.

use super::body::{framing_of, relay_body, response_framing_of, PrefixedReader};
use super::write_status_response;
use crate::common::headers::strip_hop_by_hop;
use crate::outbound::{self, RequestForm};
use crate::policy::{PolicyOutcome, RequestContext};
use crate::proto::read_response_head;
use crate::statistic::{CountingStream, ConnectionRecord};
use crate::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

pub async fn run<C>(
    client: &mut C,
    client_leftover: &[u8],
    ctx: &RequestContext,
    outcome: &PolicyOutcome,
    record: &ConnectionRecord,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let dial = outbound::dial_forward(
        outcome.upstream_proxy_url.as_ref(),
        outcome.ignore_upstream_proxy_certificate,
        outcome.local_address.as_deref(),
        &ctx.target_host,
        ctx.target_port,
    )
    .await;

    let (target, form) = match dial {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, host = %ctx.target_host, port = ctx.target_port, "forward dial failed");
            write_status_response(client, e.status(), &e.to_string(), &[]).await?;
            return Err(e);
        }
    };

    let counters = record.target_counters();
    record.mark_target_established();
    let mut target = CountingStream::new(target, counters.0.clone(), counters.1.clone());

    let filtered_request_headers = strip_hop_by_hop(&ctx.headers);
    let request_line = match &form {
        RequestForm::Relative => format!("{} {} HTTP/1.1", ctx.method, ctx.path),
        RequestForm::Absolute { .. } => {
            format!("{} {}://{}:{}{} HTTP/1.1", ctx.method, ctx.scheme, ctx.target_host, ctx.target_port, ctx.path)
        }
    };

    let mut head = format!("{request_line}\r\n");
    for (name, value) in &filtered_request_headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if let RequestForm::Absolute { proxy_authorization: Some(auth) } = &form {
        head.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    head.push_str("\r\n");

    target.write_all(head.as_bytes()).await?;

    let request_framing = framing_of(&ctx.headers);
    {
        let mut client_reader = PrefixedReader::new(client_leftover, client);
        relay_body(&mut client_reader, &mut target, request_framing).await?;
    }
    target.flush().await?;

    let (response_head, response_leftover) = match read_response_head(&mut target).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "malformed or unreachable upstream response");
            write_status_response(client, e.status(), &e.to_string(), &[]).await?;
            return Err(e);
        }
    };

    let filtered_response_headers = strip_hop_by_hop(&response_head.headers);
    let mut status_line = format!(
        "HTTP/1.1 {} {}\r\n",
        response_head.status_code,
        if response_head.reason.is_empty() { "OK" } else { &response_head.reason }
    );
    for (name, value) in &filtered_response_headers {
        status_line.push_str(&format!("{name}: {value}\r\n"));
    }
    status_line.push_str("\r\n");
    client.write_all(status_line.as_bytes()).await?;

    let response_framing = response_framing_of(&ctx.method, response_head.status_code, &response_head.headers);
    {
        let mut target_reader = PrefixedReader::new(&response_leftover, &mut target);
        relay_body(&mut target_reader, client, response_framing).await?;
    }
    client.flush().await?;

    debug!(host = %ctx.target_host, port = ctx.target_port, "forward exchange complete");
    Ok(())
}
