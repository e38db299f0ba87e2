//! Pending-request table — a one-shot rendezvous between the HTTP handler
//! task that opened a request and the connection read loop that eventually
//! delivers (or fails to deliver) its response.
//!
//! Grounded on the teacher's `TrustRegistry`/handshake-tracker cleanup-sweep
//! idiom (`summit-services/src/trust.rs`), re-keyed by request id instead of
//! peer id and built on `tokio::sync::oneshot` rather than a broadcast channel
//! since exactly one waiter ever exists per request (`spec.md` §5).

use std::time::{Duration, Instant};

use anpx_core::AnpxMessage;
use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Why a pending request resolved without a response body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("connection closed before a response was received")]
    ConnectionLost,
    #[error("request exceeded its deadline")]
    TimedOut,
    #[error("remote reported an error: {0}")]
    Remote(String),
}

pub type DispatchResult = Result<AnpxMessage, DispatchError>;

struct PendingEntry {
    tx: oneshot::Sender<DispatchResult>,
    connection_id: String,
    opened_at: Instant,
}

/// Request-id-keyed table of in-flight requests awaiting a response over a
/// WebSocket connection. One instance is shared by the whole Gateway.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request against `connection_id` and returns
    /// its freshly-minted request id plus the receiving half of the
    /// rendezvous channel.
    pub fn open(&self, connection_id: &str) -> (String, oneshot::Receiver<DispatchResult>) {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.entries.insert(
            request_id.clone(),
            PendingEntry {
                tx,
                connection_id: connection_id.to_string(),
                opened_at: Instant::now(),
            },
        );
        (request_id, rx)
    }

    /// Delivers a successful response. Returns `false` if the request id is
    /// unknown (already resolved, failed, or never opened here).
    pub fn resolve(&self, request_id: &str, message: AnpxMessage) -> bool {
        match self.entries.remove(request_id) {
            Some((_, entry)) => entry.tx.send(Ok(message)).is_ok(),
            None => false,
        }
    }

    /// Fails a specific pending request in place, e.g. on a decode or
    /// protocol error tied to that request id alone.
    pub fn fail(&self, request_id: &str, err: DispatchError) -> bool {
        match self.entries.remove(request_id) {
            Some((_, entry)) => entry.tx.send(Err(err)).is_ok(),
            None => false,
        }
    }

    /// Fails every pending request opened against `connection_id`. Called the
    /// moment a connection is removed from the registry so HTTP handlers
    /// waiting on it do not hang until their own timeout (`spec.md` §4.7
    /// "connection-lost cancellation").
    pub fn cancel_by_connection(&self, connection_id: &str) -> usize {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.connection_id == connection_id)
            .map(|e| e.key().clone())
            .collect();
        let mut cancelled = 0;
        for id in ids {
            if self.fail(&id, DispatchError::ConnectionLost) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Fails entries that have outlived `max_age` without a response, as a
    /// backstop against requests whose per-request timeout task never ran
    /// (e.g. a panicked handler).
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now.duration_since(e.opened_at) > max_age)
            .map(|e| e.key().clone())
            .collect();
        let mut expired = 0;
        for id in ids {
            if self.fail(&id, DispatchError::TimedOut) {
                expired += 1;
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
