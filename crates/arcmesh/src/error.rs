//! Unified error type for arcmesh.

use arcmesh_director::{DirectorError, RequestError};
use arcmesh_protocol::ProtocolError;
use arcmesh_services::ServiceError;
use arcmesh_session::SessionError;
use arcmesh_stateserver::StateServerError;
use arcmesh_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ArcmeshError {
    /// Connection, send, or receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Framing, encoding, or decoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The director tree refused an operation.
    #[error(transparent)]
    Director(#[from] DirectorError),

    /// A bus request went unanswered.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// A client session broke a rule or was ejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    StateServer(#[from] StateServerError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The logging subscriber could not be installed.
    #[error("logging: {0}")]
    Logging(String),
}
