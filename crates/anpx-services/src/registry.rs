//! Connection registry — tracks every live Receiver WebSocket connection and
//! coordinates its removal across the registry, the path router, and the
//! pending-request table as one atomic step.
//!
//! Grounded on the teacher's `SessionTable = Arc<DashMap<[u8; 32], ActiveSession>>`
//! (`summit-services/src/session.rs`): a `DashMap` keyed by connection
//! identity holding per-connection bookkeeping, looked up far more often than
//! it is mutated.

use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::pending::PendingTable;
use crate::router::PathRouter;

/// Lifecycle state of one Receiver connection. Entries only ever exist in
/// the path router once `Authenticated`; see [`ConnectionRegistry::authenticate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Authenticated,
    Disconnected,
}

/// One item on a connection's outbound queue. ANPX wire frames travel as
/// binary WebSocket messages; control-plane replies (pong, etc.) as text.
#[derive(Debug, Clone)]
pub enum OutboundItem {
    Frame(Vec<u8>),
    Control(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("connection {0} is not registered")]
    UnknownConnection(String),
    #[error("a connection must advertise at least one path to authenticate")]
    NoPaths,
}

#[derive(Debug, thiserror::Error)]
#[error("gateway is at capacity ({max_connections} connections)")]
pub struct CapacityError {
    pub max_connections: usize,
}

/// Per-connection bookkeeping visible to admin/status handlers. Cheap to
/// clone; holds no I/O resources of its own.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub did: Option<String>,
    pub paths: Vec<String>,
    pub state: ConnectionState,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub last_ping: Instant,
    pub in_flight: usize,
}

struct ConnectionRecord {
    did: Option<String>,
    paths: Vec<String>,
    state: ConnectionState,
    created_at: Instant,
    last_activity: Instant,
    last_ping: Instant,
    in_flight: HashSet<String>,
    outbound: mpsc::Sender<OutboundItem>,
}

impl ConnectionRecord {
    fn info(&self, connection_id: &str) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: connection_id.to_string(),
            did: self.did.clone(),
            paths: self.paths.clone(),
            state: self.state,
            created_at: self.created_at,
            last_activity: self.last_activity,
            last_ping: self.last_ping,
            in_flight: self.in_flight.len(),
        }
    }
}

/// Result of a single health-sweep pass (`spec.md` §4.9 heartbeat policy).
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Connections evicted for exceeding the idle timeout.
    pub removed: Vec<String>,
    /// Connections due a ping (activity seen, but no ping sent recently).
    pub needs_ping: Vec<(String, mpsc::Sender<OutboundItem>)>,
}

/// Owns connection bookkeeping, the path router, and the pending-request
/// table, and is the single place that can remove a connection — doing so
/// atomically across all three (`spec.md` §5).
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionRecord>,
    router: StdMutex<PathRouter>,
    pending: PendingTable,
    max_connections: usize,
    remove_lock: StdMutex<()>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            router: StdMutex::new(PathRouter::new()),
            pending: PendingTable::new(),
            max_connections,
            remove_lock: StdMutex::new(()),
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Registers a freshly-accepted, not-yet-authenticated connection.
    /// Rejects once `max_connections` is reached.
    pub fn accept(&self, outbound: mpsc::Sender<OutboundItem>) -> Result<String, CapacityError> {
        if self.connections.len() >= self.max_connections {
            return Err(CapacityError {
                max_connections: self.max_connections,
            });
        }
        let connection_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        self.connections.insert(
            connection_id.clone(),
            ConnectionRecord {
                did: None,
                paths: Vec::new(),
                state: ConnectionState::Connecting,
                created_at: now,
                last_activity: now,
                last_ping: now,
                in_flight: HashSet::new(),
                outbound,
            },
        );
        Ok(connection_id)
    }

    /// Transitions a connection to `Authenticated` and registers its
    /// advertised paths in the router. This is the only place routes are
    /// added, so any route present in the router is, by construction, owned
    /// by an authenticated connection.
    pub fn authenticate(
        &self,
        connection_id: &str,
        did: String,
        paths: Vec<String>,
    ) -> Result<(), RegistrationError> {
        if paths.is_empty() {
            return Err(RegistrationError::NoPaths);
        }
        let mut record = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(|| RegistrationError::UnknownConnection(connection_id.to_string()))?;
        record.did = Some(did);
        record.paths = paths.clone();
        record.state = ConnectionState::Authenticated;
        drop(record);

        let mut router = self.router.lock().unwrap();
        for path in &paths {
            router.add_route(path, connection_id);
        }
        Ok(())
    }

    pub fn touch_activity(&self, connection_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.last_activity = Instant::now();
        }
    }

    pub fn touch_ping(&self, connection_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.last_ping = Instant::now();
        }
    }

    pub fn record_request(&self, connection_id: &str, request_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.in_flight.insert(request_id.to_string());
        }
    }

    pub fn complete_request(&self, connection_id: &str, request_id: &str) {
        if let Some(mut record) = self.connections.get_mut(connection_id) {
            record.in_flight.remove(request_id);
        }
    }

    pub fn info(&self, connection_id: &str) -> Option<ConnectionInfo> {
        self.connections
            .get(connection_id)
            .map(|r| r.info(connection_id))
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|r| r.info(r.key()))
            .collect()
    }

    /// Resolves the connection that should serve `path`, provided it is
    /// still present in the registry (a defensive re-check: the router and
    /// registry are mutated under the same `remove_lock` critical section,
    /// but a lookup may race a concurrent removal).
    pub fn route(&self, path: &str) -> Option<(String, mpsc::Sender<OutboundItem>)> {
        let connection_id = self.router.lock().unwrap().find_route(path)?;
        let record = self.connections.get(&connection_id)?;
        if record.state != ConnectionState::Authenticated {
            return None;
        }
        Some((connection_id, record.outbound.clone()))
    }

    /// The outbound queue for a specific connection id, regardless of
    /// routing — used to deliver control-plane replies on the same
    /// connection that sent the control message.
    pub fn outbound(&self, connection_id: &str) -> Option<mpsc::Sender<OutboundItem>> {
        self.connections.get(connection_id).map(|r| r.outbound.clone())
    }

    /// Removes a connection from the registry, its routes from the router,
    /// and cancels any requests still pending against it — as one critical
    /// section, so no lookup can observe the connection gone from one
    /// structure but still present in another (`spec.md` §5 "Remove acquires
    /// all three in a fixed order").
    ///
    /// Idempotent: returns `false` if the connection was already removed.
    pub fn remove(&self, connection_id: &str) -> bool {
        let _guard = self.remove_lock.lock().unwrap();
        let Some((_, mut record)) = self.connections.remove(connection_id) else {
            return false;
        };
        record.state = ConnectionState::Disconnected;
        self.router
            .lock()
            .unwrap()
            .remove_connection_routes(connection_id);
        self.pending.cancel_by_connection(connection_id);
        true
    }

    /// Scans every connection for idle timeout or an overdue ping. Removal
    /// itself still goes through [`Self::remove`]; this only decides which
    /// ids qualify.
    pub fn sweep_health(&self, idle_timeout: Duration, ping_interval: Duration) -> SweepOutcome {
        let now = Instant::now();
        let mut outcome = SweepOutcome::default();
        let mut to_remove = Vec::new();

        for entry in self.connections.iter() {
            if now.duration_since(entry.last_activity) > idle_timeout {
                to_remove.push(entry.key().clone());
            } else if now.duration_since(entry.last_ping) > ping_interval {
                outcome
                    .needs_ping
                    .push((entry.key().clone(), entry.outbound.clone()));
            }
        }

        for id in to_remove {
            if self.remove(&id) {
                outcome.removed.push(id);
            }
        }
        outcome
    }
}
