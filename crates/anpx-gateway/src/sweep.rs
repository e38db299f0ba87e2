//! Periodic maintenance tasks — one `tokio::time::interval` loop per
//! concern, each gated on a `tokio::sync::broadcast::Receiver<()>` shutdown
//! signal, mirroring the teacher's `ChunkManager::run` shape
//! (`_old-summitd/src/chunk/manager.rs`).
//!
//! Chunk-reassembly staleness is *not* swept here: a connection's
//! [`anpx_core::chunk::ChunkAssembler`] is owned by that connection's own
//! reader task (`ws::run_reader`), not shared state the registry can reach,
//! so it prunes itself on its own interval instead of through a shared task.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use anpx_services::OutboundItem;

use crate::state::GatewayState;

/// Evicts connections idle past `connection_timeout_secs` and pings the
/// ones due for a heartbeat (`spec.md` §4.9).
pub async fn run_health_sweep(state: GatewayState, mut shutdown: broadcast::Receiver<()>) {
    let idle_timeout = Duration::from_secs(state.config.connection_timeout_secs);
    let ping_interval = Duration::from_secs(state.config.ping_interval_secs);
    let mut interval = tokio::time::interval(Duration::from_secs(state.config.health_sweep_interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("health sweep shutting down");
                return;
            }
            _ = interval.tick() => {
                let outcome = state.registry.sweep_health(idle_timeout, ping_interval);
                for connection_id in &outcome.removed {
                    tracing::info!(connection_id, "evicting idle connection");
                }
                for (connection_id, outbound) in outcome.needs_ping {
                    let ping = json!({ "type": "ping" });
                    if outbound.try_send(OutboundItem::Control(ping.to_string())).is_ok() {
                        state.registry.touch_ping(&connection_id);
                    }
                }
            }
        }
    }
}

/// Fails pending requests that have outlived `pending_table_max_age_secs`
/// without a matching response, distinct from the per-request timeout the
/// HTTP front already enforces (`spec.md` §4.7).
pub async fn run_pending_sweep(state: GatewayState, mut shutdown: broadcast::Receiver<()>) {
    let max_age = Duration::from_secs(state.config.pending_table_max_age_secs);
    let mut interval = tokio::time::interval(max_age.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("pending sweep shutting down");
                return;
            }
            _ = interval.tick() => {
                let expired = state.registry.pending().sweep_expired(max_age);
                if expired > 0 {
                    tracing::warn!(expired, "swept stale pending requests");
                }
            }
        }
    }
}
