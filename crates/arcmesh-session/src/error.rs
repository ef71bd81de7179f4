//! Error types for the session layer.

use arcmesh_protocol::{Channel, Doid};

use crate::{ClientState, DisconnectCode};

/// Everything that ends (or refuses) a client session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("illegal state transition {from:?} -> {to:?}")]
    InvalidTransition { from: ClientState, to: ClientState },

    #[error("expected hello, got {0}")]
    NoHello(String),

    #[error("protocol version {got} does not match {expected}")]
    BadVersion { expected: u32, got: u32 },

    #[error("schema hash {got:#018x} does not match {expected:#018x}")]
    BadSchemaHash { expected: u64, got: u64 },

    #[error("{0} is not allowed before authentication")]
    AnonymousViolation(String),

    #[error("cannot set field {field} of {doid}: {reason}")]
    ForbiddenField {
        doid: Doid,
        field: u16,
        reason: String,
    },

    #[error("cannot call method {method} of {doid}: {reason}")]
    ForbiddenRpc {
        doid: Doid,
        method: u16,
        reason: String,
    },

    #[error("object {0} is unknown")]
    MissingObject(Doid),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid packet: {0}")]
    InvalidMsgType(String),

    #[error("datagram of {0} bytes is too large")]
    OversizedDatagram(usize),

    #[error("no heartbeat within {0} ms")]
    NoHeartbeat(u64),

    #[error("ejected ({code}): {reason}")]
    Ejected { code: u16, reason: String },

    #[error("no session on {0}")]
    NotFound(Channel),

    #[error("{0} is already registered")]
    AlreadyRegistered(Channel),

    #[error("{0} is not a client channel")]
    ReservedChannel(Channel),

    #[error("no client channels left")]
    ChannelsExhausted,
}

impl SessionError {
    /// The code the client is ejected with for this error.
    pub fn disconnect_code(&self) -> DisconnectCode {
        match self {
            Self::NoHello(_) => DisconnectCode::NoHello,
            Self::BadVersion { .. } => DisconnectCode::BadVersion,
            Self::BadSchemaHash { .. } => DisconnectCode::BadSchemaHash,
            Self::AnonymousViolation(_) => DisconnectCode::AnonymousViolation,
            Self::ForbiddenField { .. } => DisconnectCode::ForbiddenField,
            Self::ForbiddenRpc { .. } => DisconnectCode::ForbiddenRpc,
            Self::MissingObject(_) => DisconnectCode::MissingObject,
            Self::InvalidTransition { .. } | Self::ProtocolViolation(_) => {
                DisconnectCode::ProtocolViolation
            }
            Self::InvalidMsgType(_) => DisconnectCode::InvalidMsgType,
            Self::OversizedDatagram(_) => DisconnectCode::OversizedDatagram,
            Self::NoHeartbeat(_) => DisconnectCode::NoHeartbeat,
            Self::Ejected { code, .. } => {
                DisconnectCode::from_code(*code).unwrap_or(DisconnectCode::ServerEject)
            }
            Self::NotFound(_)
            | Self::AlreadyRegistered(_)
            | Self::ReservedChannel(_)
            | Self::ChannelsExhausted => DisconnectCode::Generic,
        }
    }
}
