//! E3: with no Receiver registered, any path 404s with the exact error body
//! the Gateway's error mapping produces.

use crate::infra::{self, GatewayOpts};

#[tokio::test]
async fn unrouted_path_returns_404_with_error_and_path() {
    let gateway = infra::spawn_gateway(GatewayOpts::default()).await;

    let response = reqwest::get(format!("{}/nope", gateway.base_url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({"error": "No route found", "path": "/nope"})
    );
}
