//! E5: a Receiver socket that drops mid-flight fails the in-flight request
//! with 502 as soon as the disconnect is noticed, and the Gateway's health
//! view reflects the lost connection right after.

use std::time::Duration;

use anpx_core::chunk::ChunkAssembler;
use anpx_core::AnpxMessage;
use futures_util::SinkExt;

use crate::infra::{self, GatewayOpts};

#[tokio::test]
async fn disconnect_mid_flight_fails_request_and_drops_from_health() {
    let did = "did:wba:example:flaky".to_string();
    let mut did_paths = std::collections::BTreeMap::new();
    did_paths.insert(did.clone(), vec!["/flaky".to_string()]);

    let gateway = infra::spawn_gateway(GatewayOpts {
        did_paths,
        per_request_timeout_secs: 10,
        ..GatewayOpts::default()
    })
    .await;

    let mut receiver = infra::dial_receiver(&gateway, &did).await.unwrap();
    infra::expect_connection_ready(&mut receiver).await;

    let health_before: serde_json::Value =
        reqwest::get(format!("{}/health", gateway.base_url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(health_before["healthy_connections"], 1);

    let receiver_task = tokio::spawn(async move {
        let mut assembler = ChunkAssembler::new();
        let message = infra::recv_message(&mut receiver, &mut assembler).await;
        let AnpxMessage::HttpRequest { .. } = message else {
            panic!("expected an HttpRequest frame");
        };
        receiver.close().await.unwrap();
    });

    let response = reqwest::get(format!("{}/flaky", gateway.base_url()))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);

    tokio::time::timeout(Duration::from_secs(5), receiver_task)
        .await
        .expect("receiver task did not finish in time")
        .unwrap();

    // The Gateway's reader loop removes the connection as soon as it sees
    // the close; give the spawned `handshake` task one scheduler pass to
    // finish before asserting on the registry.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let health_after: serde_json::Value =
        reqwest::get(format!("{}/health", gateway.base_url()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(health_after["healthy_connections"], 0);
}
