//! E6: a Receiver that dials without DID-WBA headers is closed with 4003
//! and never makes it into the registry or the path router.

use crate::infra::{self, GatewayOpts};

#[tokio::test]
async fn missing_auth_header_closes_with_4003_and_registers_nothing() {
    let gateway = infra::spawn_gateway(GatewayOpts::default()).await;

    let mut receiver = infra::dial_receiver_unauthenticated(&gateway).await.unwrap();
    let code = infra::expect_close_code(&mut receiver).await;
    assert_eq!(code, 4003);

    assert_eq!(gateway.state.registry.len(), 0);

    let stats: serde_json::Value = reqwest::get(format!("{}/stats", gateway.base_url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["routes"], 0);
    assert_eq!(stats["connections"], 0);
}
