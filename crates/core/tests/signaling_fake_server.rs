//! Exercises the Signaling Client (C1) against a minimal in-process fake of
//! the conferencing server's WebSocket endpoint, grounded on
//! `DaniilShunto-Code2/recorder-main/tests/common/websocket_server.rs`'s
//! pattern (bind a loopback `TcpListener`, accept one connection, split it,
//! read/write JSON frames) instead of a live Janus gateway.

use futures_util::{SinkExt, StreamExt};
use janvlog_core::SignalingClient;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Starts a fake gateway that replies to `create`/`attach`/`keepalive`/
/// `message`/`detach`/`destroy` the way the real one does, and returns the
/// `ws://` URL to connect to.
async fn start_fake_gateway() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        while let Some(Ok(WsMessage::Text(text))) = rx.next().await {
            let request: Value = serde_json::from_str(&text).unwrap();
            let transaction = request["transaction"].clone();
            let janus = request["janus"].as_str().unwrap_or("");

            let reply = match janus {
                "create" => json!({"janus": "success", "transaction": transaction, "data": {"id": 555}}),
                "attach" => json!({"janus": "ack", "transaction": transaction, "data": {"id": 42}}),
                "keepalive" => json!({"janus": "ack", "transaction": transaction}),
                "detach" => json!({"janus": "ack", "transaction": transaction}),
                "destroy" => json!({"janus": "ack", "transaction": transaction}),
                "message" => {
                    let handle_id = request["handle_id"].as_u64().unwrap_or(0);
                    json!({
                        "janus": "success",
                        "transaction": transaction,
                        "sender": handle_id,
                        "plugindata": {
                            "plugin": "janus.plugin.videoroom",
                            "data": {"participants": [{"id": 7, "publisher": false, "display": "Ada"}]},
                        },
                    })
                }
                other => panic!("fake gateway got unexpected request kind {other}"),
            };
            tx.send(WsMessage::Text(reply.to_string().into())).await.unwrap();
        }
    });

    format!("ws://{addr}/")
}

#[tokio::test]
async fn connects_attaches_requests_and_closes_cleanly() {
    let url = start_fake_gateway().await;
    let client = SignalingClient::connect(&url).await.expect("connect should succeed");

    client.keep_alive().await.expect("keep-alive should succeed");

    let handle = client
        .attach_video_room_handle()
        .await
        .expect("attaching a handle should succeed");

    let data = handle
        .request(json!({"request": "listparticipants", "room": 1234.0, "admin_key": "janusoverlord"}))
        .await
        .expect("listparticipants should succeed");
    let participants = data["participants"].as_array().expect("participants array");
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0]["display"], "Ada");

    handle.detach().await.expect("detach should succeed");
    client.close().await.expect("close should succeed");
}
