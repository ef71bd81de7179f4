/// Failures below the frame level.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// This end was closed, or the peer went away.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a socket or completing its handshake failed. The listener
    /// itself is still usable.
    #[error("accept failed: {0}")]
    Accept(String),

    #[error("could not reach {url}: {reason}")]
    Dial { url: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    /// The listener is gone; no more connections will arrive.
    #[error("transport shut down")]
    Shutdown,
}
