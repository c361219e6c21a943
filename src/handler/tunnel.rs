//! CONNECT tunnel handler (spec.md §4.3): an opaque bidirectional pipe. TLS to the target, if
//! any, terminates at the client — the proxy never sees plaintext and never validates the
//! target's certificate.

use super::write_status_response;
use crate::common::buffer::greedy_copy_bidirectional;
use crate::outbound;
use crate::policy::PolicyOutcome;
use crate::statistic::{ConnectionRecord, CountingStream};
use crate::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

pub async fn run<C>(
    client: &mut C,
    client_leftover: &[u8],
    target_host: &str,
    target_port: u16,
    outcome: &PolicyOutcome,
    record: &ConnectionRecord,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let dial = outbound::dial_tunnel(
        outcome.upstream_proxy_url.as_ref(),
        outcome.ignore_upstream_proxy_certificate,
        outcome.local_address.as_deref(),
        target_host,
        target_port,
    )
    .await;

    let target = match dial {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, host = %target_host, port = target_port, "tunnel dial failed");
            write_status_response(client, e.status(), &e.to_string(), &[]).await?;
            return Err(e);
        }
    };

    let counters = record.target_counters();
    record.mark_target_established();
    let mut target = CountingStream::new(target, counters.0.clone(), counters.1.clone());

    client.write_all(CONNECTION_ESTABLISHED).await?;
    client.flush().await?;

    if !client_leftover.is_empty() {
        target.write_all(client_leftover).await?;
        target.flush().await?;
    }

    let (client_to_target, target_to_client) = greedy_copy_bidirectional(client, &mut target).await?;
    debug!(
        host = %target_host,
        port = target_port,
        client_to_target,
        target_to_client,
        "tunnel closed"
    );
    Ok(())
}
