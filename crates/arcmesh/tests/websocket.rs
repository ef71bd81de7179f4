//! The client agent behind a real WebSocket listener.

use std::sync::Arc;
use std::time::Duration;

use arcmesh::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Socket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn start() -> (String, Arc<SessionRegistry>) {
    let root = Director::root(DirectorConfig::default());
    let pump = spawn_pump_loop(root.clone(), PumpConfig::host());
    let sessions = Arc::new(SessionRegistry::default());
    let agent = ClientAgent::builder()
        .director(&root)
        .sessions(Arc::clone(&sessions))
        .build()
        .unwrap();
    let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    tokio::spawn(async move {
        let _pump = pump;
        agent.serve(transport).await
    });
    (format!("ws://{addr}"), sessions)
}

async fn send(ws: &mut Socket, seq: u64, message: ClientMessage) {
    let envelope = ClientEnvelope {
        seq,
        timestamp: 0,
        message,
    };
    let text = serde_json::to_string(&envelope).unwrap();
    ws.send(WsMessage::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut Socket) -> Option<ClientMessage> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("agent went quiet");
        let data = match frame {
            Some(Ok(WsMessage::Binary(data))) => data.to_vec(),
            Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        };
        let envelope: ClientEnvelope = serde_json::from_slice(&data).unwrap();
        return Some(envelope.message);
    }
}

#[tokio::test]
async fn test_websocket_hello_and_disconnect() {
    let (url, sessions) = start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // Without a schema the agent expects the hash of an empty one.
    let schema_hash = SchemaRegistry::default().schema_hash();
    send(
        &mut ws,
        1,
        ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            schema_hash,
        },
    )
    .await;
    let channel = match recv(&mut ws).await {
        Some(ClientMessage::HelloResp { client_channel }) => client_channel,
        other => panic!("expected HelloResp, got {other:?}"),
    };
    assert!(sessions.contains(channel));

    send(&mut ws, 2, ClientMessage::Heartbeat).await;
    send(&mut ws, 3, ClientMessage::Disconnecting).await;
    assert_eq!(recv(&mut ws).await, None);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!sessions.contains(channel));
}

#[tokio::test]
async fn test_websocket_garbage_hello_is_ejected() {
    let (url, sessions) = start().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(WsMessage::Text("not json".into())).await.unwrap();
    match recv(&mut ws).await {
        Some(ClientMessage::Eject { code, .. }) => {
            assert_eq!(code, DisconnectCode::NoHello.code());
        }
        other => panic!("expected Eject, got {other:?}"),
    }
    assert_eq!(recv(&mut ws).await, None);
    assert!(sessions.is_empty());
}
