//! WebSocket transport on `tokio-tungstenite`.
//!
//! One WebSocket message carries one frame. Binary messages are what
//! arcmesh sends; text messages are accepted too so browser clients can
//! speak JSON packets directly.

use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Transport, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Listens for WebSocket clients and director peers.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// # Errors
    /// [`TransportError::Bind`] if the address can't be bound.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr, "websocket listener bound");
        Ok(Self { listener })
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Dials `url` (`ws://host:port`). Director roots use this to link
    /// upstream.
    ///
    /// # Errors
    /// [`TransportError::Dial`] if the socket or the handshake fails.
    pub async fn connect(url: &str) -> Result<WebSocketConnection, TransportError> {
        let (socket, _) =
            tokio_tungstenite::connect_async(url)
                .await
                .map_err(|e| TransportError::Dial {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        let conn = WebSocketConnection::new(socket);
        tracing::debug!(id = %conn.id, url, "websocket dialed");
        Ok(conn)
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::Accept(e.to_string()))?;
        let socket = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| TransportError::Accept(format!("handshake with {peer}: {e}")))?;
        let conn = WebSocketConnection::new(socket);
        tracing::debug!(id = %conn.id, %peer, "websocket accepted");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// One WebSocket peer.
///
/// Halves are locked separately, so a task parked in `recv` never holds up
/// a `send` from the bus side.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<Socket, WsMessage>>,
    source: Mutex<SplitStream<Socket>>,
}

impl WebSocketConnection {
    fn new(socket: Socket) -> Self {
        let (sink, source) = socket.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        }
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Binary(data.to_vec().into()))
            .await
            .map_err(|e| TransportError::Send(format!("{}: {e}", self.id)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut source = self.source.lock().await;
        while let Some(next) = source.next().await {
            let frame = match next {
                Ok(WsMessage::Binary(data)) => data.to_vec(),
                Ok(WsMessage::Text(text)) => text.as_bytes().to_vec(),
                Ok(WsMessage::Close(_)) => return Ok(None),
                // ping, pong, raw frames
                Ok(_) => continue,
                Err(e) => return Err(TransportError::Receive(format!("{}: {e}", self.id))),
            };
            return Ok(Some(frame));
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Send(format!("{} close: {e}", self.id)))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
