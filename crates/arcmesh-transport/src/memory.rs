//! In-process transport built on Tokio channels.
//!
//! Frames are moved, not copied through a socket, so a director tree or a
//! client agent can be wired up inside one process (and inside tests)
//! with the same [`Connection`] surface the WebSocket transport offers.

use tokio::sync::{mpsc, Mutex};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// One end of an in-memory duplex connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Creates two connected endpoints. Whatever one sends, the other receives.
pub fn memory_pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a = MemoryConnection {
        id: ConnectionId::next(),
        tx: Mutex::new(Some(a_tx)),
        rx: Mutex::new(a_rx),
    };
    let b = MemoryConnection {
        id: ConnectionId::next(),
        tx: Mutex::new(Some(b_tx)),
        rx: Mutex::new(b_rx),
    };
    (a, b)
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| {
            TransportError::ConnectionClosed(format!("{} closed locally", self.id))
        })?;
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed(format!("{} peer gone", self.id))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        // Dropping our sender ends the peer's receive stream.
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Listener side of the in-memory transport.
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
}

/// Dialer side of the in-memory transport. Cheap to clone.
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryTransport {
    /// Creates a listener and the connector used to reach it.
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, incoming) = mpsc::unbounded_channel();
        (Self { incoming }, MemoryConnector { tx })
    }
}

impl MemoryConnector {
    /// Opens a connection to the listening [`MemoryTransport`].
    pub fn connect(&self) -> Result<MemoryConnection, TransportError> {
        let (local, remote) = memory_pair();
        self.tx
            .send(remote)
            .map_err(|_| TransportError::Shutdown)?;
        tracing::debug!(id = %local.id(), "memory connection opened");
        Ok(local)
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        self.incoming.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_frames_in_order() {
        let (a, b) = memory_pair();
        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = memory_pair();
        a.close().await.unwrap();
        assert!(b.recv().await.unwrap().is_none());
        assert!(a.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_connector_reaches_transport() {
        let (mut transport, connector) = MemoryTransport::new();
        let client = connector.connect().unwrap();
        let server = transport.accept().await.unwrap();
        client.send(b"ping").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"ping");
        assert_ne!(client.id(), server.id());
    }

    #[tokio::test]
    async fn test_connect_after_listener_dropped_fails() {
        let (transport, connector) = MemoryTransport::new();
        drop(transport);
        assert!(matches!(connector.connect(), Err(TransportError::Shutdown)));
    }
}
