//! anpx-gateway binary entry point.
//!
//! Grounded on the teacher's `summitd::main` shape: `tracing_subscriber`
//! init from `RUST_LOG`, spawn the long-running tasks, then
//! `tokio::select!` over all of them plus a Ctrl-C listener so any task
//! exiting (or a signal) brings the process down.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use anpx_core::AnpxConfig;
use anpx_gateway::state::GatewayState;
use anpx_services::{AllowListVerifier, StaticPathOracle};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AnpxConfig::load()?;
    tracing::info!(http_addr = %config.gateway.http_addr, "anpx-gateway starting");

    let verifier = Arc::new(AllowListVerifier::new(config.auth.allowed_dids.clone()));
    let oracle = Arc::new(StaticPathOracle::new(config.auth.did_paths.clone()));
    let state = GatewayState::new(config.gateway.clone(), config.auth.clone(), verifier, oracle);

    let (shutdown_tx, _) = broadcast::channel(1);

    let serve_task = tokio::spawn(anpx_gateway::serve(state.clone(), state.config.http_addr.clone()));
    let health_sweep_task = tokio::spawn(anpx_gateway::sweep::run_health_sweep(
        state.clone(),
        shutdown_tx.subscribe(),
    ));
    let pending_sweep_task = tokio::spawn(anpx_gateway::sweep::run_pending_sweep(
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        r = serve_task => tracing::error!("http server task exited: {:?}", r),
        r = health_sweep_task => tracing::error!("health sweep task exited: {:?}", r),
        r = pending_sweep_task => tracing::error!("pending sweep task exited: {:?}", r),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(());
        }
    }

    Ok(())
}
