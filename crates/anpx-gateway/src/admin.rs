//! Reserved admin routes — `/health` and `/stats` — never routed to
//! Receivers (`spec.md` §6 "reserved paths").

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::GatewayState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub healthy_connections: usize,
    pub pending_requests: usize,
}

pub async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        healthy_connections: state.registry.len(),
        pending_requests: state.registry.pending().len(),
    })
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub connections: usize,
    pub pending_requests: usize,
    pub routes: usize,
    pub unique_route_connections: usize,
}

pub async fn stats(State(state): State<GatewayState>) -> Json<StatsResponse> {
    let connections: Vec<_> = state.registry.list();
    Json(StatsResponse {
        connections: connections.len(),
        pending_requests: state.registry.pending().len(),
        routes: connections.iter().map(|c| c.paths.len()).sum(),
        unique_route_connections: connections.iter().filter(|c| !c.paths.is_empty()).count(),
    })
}
