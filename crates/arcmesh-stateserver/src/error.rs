//! Error types for the object authority.

use arcmesh_director::{DirectorError, RequestError};
use arcmesh_protocol::{ProtocolError, StateFailure};

/// Errors from an [`ObjectAuthority`](crate::ObjectAuthority).
#[derive(Debug, thiserror::Error)]
pub enum StateServerError {
    /// The authority refused the operation.
    #[error(transparent)]
    Failure(#[from] StateFailure),

    /// The remote authority did not answer.
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The remote authority answered with the wrong message.
    #[error("unexpected reply with message type {0:?}")]
    UnexpectedReply(Option<u16>),
}

impl StateServerError {
    /// The refusal, if the authority answered with one.
    pub fn failure(&self) -> Option<&StateFailure> {
        match self {
            Self::Failure(f) => Some(f),
            _ => None,
        }
    }
}
