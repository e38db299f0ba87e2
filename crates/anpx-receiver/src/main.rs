//! anpx-receiver binary entry point.
//!
//! Grounded on the teacher's `summitd::main` shape, adapted to the single
//! long-running dial loop a Receiver runs (`spec.md` §4.11).

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use anpx_core::AnpxConfig;
use anpx_receiver::{HttpForwardApp, ReceiverClient};
use anpx_services::StaticDidSigner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AnpxConfig::load()?;
    tracing::info!(
        gateway_url = %config.receiver.gateway_url,
        did = %config.receiver.did,
        "anpx-receiver starting"
    );

    let signer = Arc::new(StaticDidSigner::new(config.receiver.did.clone()));
    let app = Arc::new(HttpForwardApp::new(config.receiver.local_app_url.clone()));
    let client = ReceiverClient::new(config.receiver, signer, app);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::select! {
        _ = client.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(());
        }
    }

    Ok(())
}
