//! Error types for the service layer.

use arcmesh_director::{DirectorError, RequestError};
use arcmesh_protocol::{Channel, ProtocolError};

/// Errors from service registration, RPC dispatch, and object stubs.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// No handler for this (type, method) pair.
    #[error("no handler for method {method} of type {type_id}")]
    UnknownMethod { type_id: u16, method: u16 },

    #[error("service {0:?} is already registered")]
    AlreadyRegistered(String),

    /// Services must listen outside the reserved channel space.
    #[error("channel {0} is reserved")]
    ReservedChannel(Channel),

    #[error("no service named {0:?}")]
    NotFound(String),

    /// The remote side answered the call with an error.
    #[error("call failed: {0}")]
    CallFailed(String),

    #[error("unexpected reply with message type {0:?}")]
    UnexpectedReply(Option<u16>),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
