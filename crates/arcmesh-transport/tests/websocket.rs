//! WebSocket transport against real sockets on OS-assigned ports.

#[cfg(feature = "websocket")]
mod websocket {
    use std::sync::Arc;

    use arcmesh_transport::{Connection, Transport, TransportError, WebSocketTransport};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    async fn listener() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", transport.local_addr().unwrap());
        (transport, url)
    }

    #[tokio::test]
    async fn test_binary_and_text_frames_arrive_as_bytes() {
        let (mut transport, url) = listener().await;
        let accepted = tokio::spawn(async move { transport.accept().await.unwrap() });
        let (mut client, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let server = accepted.await.unwrap();

        client
            .send(Message::Binary(vec![0, 1, 2].into()))
            .await
            .unwrap();
        client
            .send(Message::Text(r#"{"type":"Heartbeat"}"#.into()))
            .await
            .unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), vec![0, 1, 2]);
        assert_eq!(
            server.recv().await.unwrap().unwrap(),
            br#"{"type":"Heartbeat"}"#.to_vec()
        );

        server.send(b"frame").await.unwrap();
        let got = client.next().await.unwrap().unwrap();
        assert!(got.is_binary());
        assert_eq!(got.into_data().as_ref(), b"frame");
    }

    #[tokio::test]
    async fn test_server_close_ends_client_stream_and_vice_versa() {
        let (mut transport, url) = listener().await;
        let accepted = tokio::spawn(async move { transport.accept().await.unwrap() });
        let dialed = WebSocketTransport::connect(&url).await.unwrap();
        let server = accepted.await.unwrap();

        dialed.close().await.unwrap();
        assert!(server.recv().await.unwrap().is_none());
        assert_ne!(dialed.id(), server.id());
    }

    #[tokio::test]
    async fn test_send_is_not_blocked_by_parked_reader() {
        let (mut transport, url) = listener().await;
        let accepted = tokio::spawn(async move { transport.accept().await.unwrap() });
        let dialed = WebSocketTransport::connect(&url).await.unwrap();
        let server = Arc::new(accepted.await.unwrap());

        let reader = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.recv().await })
        };
        server.send(b"down").await.unwrap();
        assert_eq!(dialed.recv().await.unwrap().unwrap(), b"down");

        dialed.send(b"up").await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap().unwrap(), b"up");
    }

    #[tokio::test]
    async fn test_bind_conflict_and_dial_failure_are_reported() {
        let (transport, url) = listener().await;
        let addr = transport.local_addr().unwrap().to_string();
        assert!(matches!(
            WebSocketTransport::bind(&addr).await,
            Err(TransportError::Bind { .. })
        ));

        drop(transport);
        assert!(matches!(
            WebSocketTransport::connect(&url).await,
            Err(TransportError::Dial { .. })
        ));
    }
}
