//! `/health` and `/stats` commands, against the Gateway's reserved admin
//! routes (`spec.md` §6).

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
    healthy_connections: usize,
    pending_requests: usize,
}

#[derive(Deserialize)]
struct StatsResponse {
    connections: usize,
    pending_requests: usize,
    routes: usize,
    unique_route_connections: usize,
}

pub async fn cmd_health(addr: &str) -> Result<()> {
    let resp: HealthResponse = get_json(&format!("{}/health", base_url(addr))).await?;
    println!("status             : {}", resp.status);
    println!("healthy connections: {}", resp.healthy_connections);
    println!("pending requests   : {}", resp.pending_requests);
    Ok(())
}

pub async fn cmd_stats(addr: &str) -> Result<()> {
    let resp: StatsResponse = get_json(&format!("{}/stats", base_url(addr))).await?;
    println!("connections              : {}", resp.connections);
    println!("pending requests         : {}", resp.pending_requests);
    println!("routes                   : {}", resp.routes);
    println!("unique route connections : {}", resp.unique_route_connections);
    Ok(())
}
