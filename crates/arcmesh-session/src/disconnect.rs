//! Disconnect codes sent to clients in `Eject`.

use std::fmt;

/// Why the agent dropped a client. The numbers are part of the client
/// protocol and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DisconnectCode {
    OversizedDatagram = 106,
    NoHello = 107,
    InvalidMsgType = 108,
    TruncatedDatagram = 109,
    ProtocolViolation = 110,
    AnonymousViolation = 113,
    ForbiddenInterest = 115,
    MissingObject = 117,
    ForbiddenField = 118,
    ForbiddenRpc = 120,
    BadVersion = 124,
    BadSchemaHash = 125,
    /// A cluster process asked for the client to be removed.
    ServerEject = 153,
    NoHeartbeat = 345,
    NetworkError = 347,
    Generic = 999,
}

impl DisconnectCode {
    const ALL: [DisconnectCode; 16] = [
        Self::OversizedDatagram,
        Self::NoHello,
        Self::InvalidMsgType,
        Self::TruncatedDatagram,
        Self::ProtocolViolation,
        Self::AnonymousViolation,
        Self::ForbiddenInterest,
        Self::MissingObject,
        Self::ForbiddenField,
        Self::ForbiddenRpc,
        Self::BadVersion,
        Self::BadSchemaHash,
        Self::ServerEject,
        Self::NoHeartbeat,
        Self::NetworkError,
        Self::Generic,
    ];

    /// Wire value.
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Returns `true` for codes caused by breaking the security rules.
    pub fn is_security_violation(self) -> bool {
        matches!(
            self,
            Self::AnonymousViolation
                | Self::ForbiddenField
                | Self::ForbiddenRpc
                | Self::ForbiddenInterest
        )
    }
}

impl fmt::Display for DisconnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}
