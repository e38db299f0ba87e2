//! anpx-gateway — the ANPX Gateway: axum HTTP front, WebSocket acceptor, and
//! periodic health/pending/chunk sweeps, grounded on the teacher's
//! `summit-api`/`summitd` split (`lib.rs`'s `serve()` shape, `main.rs`'s
//! `tokio::select!` supervisor).

pub mod admin;
pub mod domain;
pub mod error;
pub mod http;
pub mod state;
pub mod sweep;
pub mod ws;

use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use state::GatewayState;

pub fn router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(admin::health))
        .route("/stats", get(admin::stats))
        .route("/ws", get(ws::accept))
        .fallback(any(http::forward))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: GatewayState, addr: String) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
