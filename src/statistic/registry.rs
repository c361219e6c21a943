//! Connection registry (spec.md §4.7): assigns each accepted client socket a monotonic id,
//! stores live byte-accounting stats in a lock-free map, and applies the TLS-overhead
//! consistency check/fallback described in §4.9.

use super::events::{Event, EventBus, EventReceiver};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A snapshot of `stats`, spec.md §3: `trg*` is `None` until a target connection is dialed.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectionStats {
    #[serde(rename = "srcRxBytes")]
    pub src_rx_bytes: u64,
    #[serde(rename = "srcTxBytes")]
    pub src_tx_bytes: u64,
    #[serde(rename = "trgRxBytes")]
    pub trg_rx_bytes: Option<u64>,
    #[serde(rename = "trgTxBytes")]
    pub trg_tx_bytes: Option<u64>,
}

/// Pair of shared counters handed to a `CountingStream`: `(rx, tx)`, each independently clonable
/// so the pair can be split across a `CountingStream::new(inner, rx, tx)` call.
pub type Counters = (Arc<AtomicU64>, Arc<AtomicU64>);

pub fn new_counters() -> Counters {
    (Arc::new(AtomicU64::new(0)), Arc::new(AtomicU64::new(0)))
}

/// One record per accepted client socket, spec.md §3 "Connection".
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub started_at: DateTime<Utc>,
    pub client_addr: SocketAddr,
    /// Raw TCP socket counters. For a plain HTTP listener these are the only counters and are
    /// authoritative by construction. For a TLS listener these wrap the socket underneath the
    /// record layer and are authoritative unless the consistency check in §4.9 fails.
    raw: Counters,
    /// Application/TLS-plaintext-layer counters, present only for TLS listeners; used for the
    /// §4.9 consistency check and as the fallback when the raw count is inconsistent or absent.
    app: Option<Counters>,
    trg: Counters,
    trg_established: AtomicBool,
    tls_overhead_reported: AtomicBool,
}

impl ConnectionRecord {
    pub fn raw_counters(&self) -> Counters {
        self.raw.clone()
    }

    pub fn app_counters(&self) -> Option<Counters> {
        self.app.clone()
    }

    pub fn target_counters(&self) -> Counters {
        self.trg.clone()
    }

    pub fn mark_target_established(&self) {
        self.trg_established.store(true, Ordering::Relaxed);
    }

    fn consistent_pair(&self, raw: u64, app: u64) -> (u64, bool) {
        if raw >= app {
            (raw, false)
        } else {
            (app, true)
        }
    }

    /// Computes the current stats snapshot, applying the §4.9 consistency check. Returns
    /// whether this call is the one that should emit `tlsOverheadUnavailable` (first time only).
    fn stats_and_fallback(&self) -> (ConnectionStats, bool) {
        let raw_rx = self.raw.0.load(Ordering::Relaxed);
        let raw_tx = self.raw.1.load(Ordering::Relaxed);

        let (src_rx, src_tx, fell_back) = match &self.app {
            None => (raw_rx, raw_tx, false),
            Some(app) => {
                let app_rx = app.0.load(Ordering::Relaxed);
                let app_tx = app.1.load(Ordering::Relaxed);
                let (rx, fb_rx) = self.consistent_pair(raw_rx, app_rx);
                let (tx, fb_tx) = self.consistent_pair(raw_tx, app_tx);
                (rx, tx, fb_rx || fb_tx)
            }
        };

        let (trg_rx, trg_tx) = if self.trg_established.load(Ordering::Relaxed) {
            (Some(self.trg.0.load(Ordering::Relaxed)), Some(self.trg.1.load(Ordering::Relaxed)))
        } else {
            (None, None)
        };

        let should_emit =
            fell_back && !self.tls_overhead_reported.swap(true, Ordering::Relaxed) && self.app.is_some();

        (
            ConnectionStats { src_rx_bytes: src_rx, src_tx_bytes: src_tx, trg_rx_bytes: trg_rx, trg_tx_bytes: trg_tx },
            should_emit,
        )
    }
}

/// Lock-free registry of live connections, owned by `server::Server`.
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Arc<ConnectionRecord>>,
    events: EventBus,
}

impl ConnectionRegistry {
    pub fn new(events: EventBus) -> Self {
        Self { next_id: AtomicU64::new(1), connections: DashMap::new(), events }
    }

    /// Registers a plain (non-TLS) connection: a single counter pair is both raw and app.
    pub fn register_plain(&self, client_addr: SocketAddr) -> (ConnectionId, Arc<ConnectionRecord>) {
        self.register(client_addr, new_counters(), None)
    }

    /// Registers a TLS connection, given the raw parent-socket counters already used to count the
    /// handshake (spec.md §4.9 expects handshake bytes on the src side) and the app/plaintext
    /// counters used for the consistency check. Both counter pairs are always constructed by the
    /// caller before the handshake even starts (the "parent socket" is owned data here, not an
    /// introspected runtime reference), so spec.md §4.9's "Absence handling" case never arises in
    /// this registration path — only the consistency-check fallback in `stats_and_fallback` can
    /// trigger `tlsOverheadUnavailable` for a TLS connection.
    ///
    /// Only called once the TLS handshake has already succeeded — a failed handshake never
    /// reaches the registry (spec.md §4.1, §7: "TLS failure from client: never registered").
    pub fn register_tls(
        &self,
        client_addr: SocketAddr,
        raw_counters: Counters,
        app_counters: Counters,
    ) -> (ConnectionId, Arc<ConnectionRecord>) {
        self.register(client_addr, raw_counters, Some(app_counters))
    }

    fn register(&self, client_addr: SocketAddr, raw: Counters, app: Option<Counters>) -> (ConnectionId, Arc<ConnectionRecord>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(ConnectionRecord {
            id,
            started_at: Utc::now(),
            client_addr,
            raw,
            app,
            trg: new_counters(),
            trg_established: AtomicBool::new(false),
            tls_overhead_reported: AtomicBool::new(false),
        });
        self.connections.insert(id, record.clone());
        (id, record)
    }

    /// spec.md §4.7 `getConnectionIds`.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// spec.md §4.7 `getConnectionStats`. A lock-free snapshot; absent once closed.
    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        let record = self.connections.get(&id)?;
        let (stats, should_emit) = record.stats_and_fallback();
        if should_emit {
            self.events.emit(Event::TlsOverheadUnavailable {
                connection_id: id,
                reason: "raw_socket_inconsistent",
            });
        }
        Some(stats)
    }

    /// spec.md §6.2: subscribes to the server's event bus (`connectionClosed`, `requestFailed`,
    /// `tlsOverheadUnavailable`).
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Emits `requestFailed { error, request }` (spec.md §4.7, §8) for a pre-response error
    /// reported to the client, before the client socket is closed.
    pub fn events_request_failed(&self, id: ConnectionId, error: &crate::Error) {
        self.events.emit(Event::RequestFailed { connection_id: id, message: error.to_string() });
    }

    /// Removes the record and emits the final, one-shot `connectionClosed` event (spec.md §4.7).
    pub fn close(&self, id: ConnectionId) {
        if let Some((_, record)) = self.connections.remove(&id) {
            let (stats, _) = record.stats_and_fallback();
            self.events.emit(Event::ConnectionClosed { connection_id: id, stats });
        }
    }

    pub fn close_all(&self) {
        let ids = self.connection_ids();
        for id in ids {
            self.close(id);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
