//! E2: a 1 MiB body chunked at 64 KiB splits into exactly 17 wire frames,
//! exactly one of them carrying the final-chunk marker, and echoes back
//! byte-for-byte.

use anpx_core::chunk::ChunkAssembler;
use anpx_core::AnpxMessage;

use crate::infra::{self, GatewayOpts};

const CHUNK_SIZE: usize = 64 * 1024;
const BODY_LEN: usize = 1024 * 1024;

#[tokio::test]
async fn large_post_chunks_into_seventeen_frames_and_round_trips() {
    let did = "did:wba:example:upload".to_string();
    let mut did_paths = std::collections::BTreeMap::new();
    did_paths.insert(did.clone(), vec!["/upload".to_string()]);

    let gateway = infra::spawn_gateway(GatewayOpts {
        did_paths,
        max_chunk_size: CHUNK_SIZE,
        ..GatewayOpts::default()
    })
    .await;

    let mut receiver = infra::dial_receiver(&gateway, &did).await.unwrap();
    infra::expect_connection_ready(&mut receiver).await;

    let receiver_task = tokio::spawn(async move {
        let mut assembler = ChunkAssembler::new();
        let (message, frame_count) =
            infra::recv_message_counting_frames(&mut receiver, &mut assembler).await;
        let AnpxMessage::HttpRequest { request_id, body, .. } = message else {
            panic!("expected an HttpRequest frame");
        };
        infra::send_response(
            &mut receiver,
            &request_id,
            200,
            infra::json_headers(),
            &body,
            CHUNK_SIZE,
        )
        .await;
        (frame_count, body)
    });

    let body = vec![b'A'; BODY_LEN];
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/upload", gateway.base_url()))
        .body(body.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let response_body = response.bytes().await.unwrap();
    assert_eq!(response_body.len(), BODY_LEN);
    assert_eq!(response_body.as_ref(), body.as_slice());

    let (frame_count, received_body) =
        tokio::time::timeout(std::time::Duration::from_secs(5), receiver_task)
            .await
            .expect("receiver task did not finish in time")
            .unwrap();

    assert_eq!(frame_count, 17);
    assert_eq!(received_body, body);
}
