//! IP-anonymization wrapper (spec.md §1, "external collaborators"): a [`PolicyCallback`]
//! decorator that rotates the outbound bind address across a configured pool, so consecutive
//! connections leave through different local addresses. Built entirely on the public core API
//! (`PolicyCallback`, `PolicyOutcome.local_address`) — it never reaches into `server` or
//! `statistic` internals.

use crate::policy::{PolicyCallback, PolicyOutcome, PolicyRequest};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps an inner policy, overwriting `PolicyOutcome.local_address` with the next address from a
/// fixed pool on every call (round-robin). Addresses the inner policy already set are replaced,
/// since rotating the egress address is this wrapper's entire purpose.
pub struct LocalAddressOutbound {
    inner: Arc<dyn PolicyCallback>,
    pool: Vec<String>,
    next: AtomicUsize,
}

impl LocalAddressOutbound {
    /// `pool` must be non-empty; each entry is a bare IP address already assigned to a local
    /// interface (no port — the OS picks an ephemeral one per connection).
    pub fn new(inner: Arc<dyn PolicyCallback>, pool: Vec<String>) -> Self {
        assert!(!pool.is_empty(), "LocalAddressOutbound needs at least one bind address");
        LocalAddressOutbound { inner, pool, next: AtomicUsize::new(0) }
    }

    fn next_address(&self) -> String {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        self.pool[i].clone()
    }
}

#[async_trait]
impl PolicyCallback for LocalAddressOutbound {
    async fn decide(&self, request: &PolicyRequest) -> Result<PolicyOutcome> {
        let mut outcome = self.inner.decide(request).await?;
        outcome.local_address = Some(self.next_address());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AllowAll;

    fn sample_request() -> PolicyRequest {
        PolicyRequest {
            connection_id: crate::statistic::ConnectionId(1),
            peer_addr: "127.0.0.1:9000".parse().unwrap(),
            method: "GET".to_string(),
            is_http: true,
            hostname: "example.com".to_string(),
            port: 80,
            username: None,
            password: None,
            request_line: "GET http://example.com/ HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn rotates_through_the_pool() {
        let policy = LocalAddressOutbound::new(Arc::new(AllowAll), vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        let first = policy.decide(&sample_request()).await.unwrap();
        let second = policy.decide(&sample_request()).await.unwrap();
        let third = policy.decide(&sample_request()).await.unwrap();
        assert_eq!(first.local_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(second.local_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(third.local_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    #[should_panic(expected = "at least one bind address")]
    async fn rejects_an_empty_pool() {
        LocalAddressOutbound::new(Arc::new(AllowAll), Vec::new());
    }
}
