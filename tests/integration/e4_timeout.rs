//! E4: a Receiver that never answers within the per-request deadline causes
//! the Gateway to return 504 right at the deadline, not later.

use std::time::{Duration, Instant};

use anpx_core::chunk::ChunkAssembler;
use anpx_core::AnpxMessage;

use crate::infra::{self, GatewayOpts};

#[tokio::test]
async fn slow_receiver_times_out_at_the_deadline() {
    let did = "did:wba:example:slow".to_string();
    let mut did_paths = std::collections::BTreeMap::new();
    did_paths.insert(did.clone(), vec!["/slow".to_string()]);

    let gateway = infra::spawn_gateway(GatewayOpts {
        did_paths,
        per_request_timeout_secs: 1,
        ..GatewayOpts::default()
    })
    .await;

    let mut receiver = infra::dial_receiver(&gateway, &did).await.unwrap();
    infra::expect_connection_ready(&mut receiver).await;

    // The fake local app takes its time; it never answers within the
    // Gateway's one-second deadline, so the response it eventually would
    // have sent is irrelevant to this test.
    let receiver_task = tokio::spawn(async move {
        let mut assembler = ChunkAssembler::new();
        let message = infra::recv_message(&mut receiver, &mut assembler).await;
        let AnpxMessage::HttpRequest { .. } = message else {
            panic!("expected an HttpRequest frame");
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        receiver
    });

    let started = Instant::now();
    let response = reqwest::get(format!("{}/slow", gateway.base_url()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status().as_u16(), 504);
    assert!(
        elapsed >= Duration::from_millis(1000) && elapsed <= Duration::from_millis(1300),
        "expected timeout within 1.0-1.3s, got {elapsed:?}"
    );

    receiver_task.abort();
}
