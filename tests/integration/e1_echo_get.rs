//! E1: a Receiver advertising `/echo` answers a `GET` with a JSON echo of
//! the request it saw.

use anpx_core::chunk::ChunkAssembler;
use anpx_core::AnpxMessage;

use crate::infra::{self, GatewayOpts};

#[tokio::test]
async fn echo_get_round_trips_method_path_query_and_headers() {
    let did = "did:wba:example:r1".to_string();
    let mut did_paths = std::collections::BTreeMap::new();
    did_paths.insert(did.clone(), vec!["/echo".to_string()]);

    let gateway = infra::spawn_gateway(GatewayOpts {
        did_paths,
        ..GatewayOpts::default()
    })
    .await;

    let mut receiver = infra::dial_receiver(&gateway, &did).await.unwrap();
    infra::expect_connection_ready(&mut receiver).await;

    let receiver_task = tokio::spawn(async move {
        let mut assembler = ChunkAssembler::new();
        let message = infra::recv_message(&mut receiver, &mut assembler).await;
        let AnpxMessage::HttpRequest { request_id, meta, .. } = message else {
            panic!("expected an HttpRequest frame");
        };
        let echo = serde_json::json!({
            "method": meta.method,
            "path": meta.path,
            "query": meta.query,
            "headers": meta.headers,
        });
        infra::send_response(
            &mut receiver,
            &request_id,
            200,
            infra::json_headers(),
            echo.to_string().as_bytes(),
            64 * 1024,
        )
        .await;
        receiver
    });

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/echo?x=1", gateway.base_url()))
        .header("X-Test", "a")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/echo");
    assert_eq!(body["query"], serde_json::json!({"x": "1"}));
    assert_eq!(body["headers"]["x-test"], "a");

    let _receiver = tokio::time::timeout(std::time::Duration::from_secs(5), receiver_task)
        .await
        .expect("receiver task did not finish in time")
        .unwrap();
}
