//! Packets exchanged between the client agent and external game clients.
//!
//! Packets travel as JSON [`ClientEnvelope`]s over the transport. The
//! `type` tag names the packet:
//!
//! ```json
//! {"seq": 1, "timestamp": 5000, "message": {"type": "Hello", "version": 1, "schema_hash": 42}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{Channel, Doid, FieldValue};

/// Version a client must present in its `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// A client packet.
///
/// Variants are grouped by direction; a few (`ObjectSetField`) travel both
/// ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    // -- connection lifecycle --
    /// Client → agent. Must be the first packet.
    Hello { version: u32, schema_hash: u64 },
    /// Agent → client. Carries the channel the session was given.
    HelloResp { client_channel: Channel },
    /// Client → agent. Orderly disconnect.
    Disconnecting,
    /// Agent → client. The last packet before the connection closes.
    Eject { code: u16, reason: String },
    Heartbeat,
    /// Agent → client. The bus promoted this session.
    Authenticated,

    // -- datagram relay --
    /// Client → agent → `channel` as a `ServiceDatagram`.
    SendDatagram { channel: Channel, data: Vec<u8> },
    /// Agent → client. Raw data relayed from `channel`.
    Datagram { channel: Channel, data: Vec<u8> },

    // -- objects --
    GenerateObject {
        doid: Doid,
        parent: Doid,
        type_id: u16,
        fields: Vec<(u16, FieldValue)>,
    },
    /// Like `GenerateObject`, for an object this session owns.
    GenerateObjectOwner {
        doid: Doid,
        parent: Doid,
        type_id: u16,
        fields: Vec<(u16, FieldValue)>,
    },
    DestroyObject { doid: Doid },
    ObjectSetField {
        doid: Doid,
        field: u16,
        value: FieldValue,
        #[serde(default)]
        correlation: u32,
    },
    ObjectGetField { request_id: u32, doid: Doid, field: u16 },
    ObjectGetFieldResp {
        request_id: u32,
        doid: Doid,
        field: u16,
        value: Option<FieldValue>,
    },
    SendRpc {
        doid: Doid,
        method: u16,
        args: FieldValue,
        /// 0 means fire-and-forget.
        #[serde(default)]
        request_id: u32,
    },
    SendRpcResp {
        request_id: u32,
        doid: Doid,
        method: u16,
        result: Result<FieldValue, String>,
    },
    /// Agent → client. A method call fanned out on a mirror channel.
    ObjectRpc { doid: Doid, method: u16, args: FieldValue },
    DiscoverObjectChildren { context: u32, doid: Doid },
    DiscoverObjectChildrenResp {
        context: u32,
        doid: Doid,
        children: Vec<Doid>,
    },
    ObjectMoved { doid: Doid, parent: Doid },
    /// Agent → client. The object left this session's interest.
    ObjectLeft { doid: Doid },

    // -- interest --
    AddInterest { context: u32, doid: Doid },
    AddInterestRange { context: u32, low: Doid, high: Doid },
    AddInterestMultiple { context: u32, doids: Vec<Doid> },
    AddInterestResp { context: u32 },
    RemoveInterest { context: u32, doid: Doid },
    RemoveInterestRange { context: u32, low: Doid, high: Doid },
    RemoveInterestMultiple { context: u32, doids: Vec<Doid> },
    RemoveInterestResp { context: u32 },

    // -- services --
    DiscoverService { name: String },
    DiscoverServiceResp { name: String, channel: Option<Channel> },
    CloseService { name: String },
}

impl ClientMessage {
    /// Packet name, as it appears in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::HelloResp { .. } => "HelloResp",
            Self::Disconnecting => "Disconnecting",
            Self::Eject { .. } => "Eject",
            Self::Heartbeat => "Heartbeat",
            Self::Authenticated => "Authenticated",
            Self::SendDatagram { .. } => "SendDatagram",
            Self::Datagram { .. } => "Datagram",
            Self::GenerateObject { .. } => "GenerateObject",
            Self::GenerateObjectOwner { .. } => "GenerateObjectOwner",
            Self::DestroyObject { .. } => "DestroyObject",
            Self::ObjectSetField { .. } => "ObjectSetField",
            Self::ObjectGetField { .. } => "ObjectGetField",
            Self::ObjectGetFieldResp { .. } => "ObjectGetFieldResp",
            Self::SendRpc { .. } => "SendRpc",
            Self::SendRpcResp { .. } => "SendRpcResp",
            Self::ObjectRpc { .. } => "ObjectRpc",
            Self::DiscoverObjectChildren { .. } => "DiscoverObjectChildren",
            Self::DiscoverObjectChildrenResp { .. } => "DiscoverObjectChildrenResp",
            Self::ObjectMoved { .. } => "ObjectMoved",
            Self::ObjectLeft { .. } => "ObjectLeft",
            Self::AddInterest { .. } => "AddInterest",
            Self::AddInterestRange { .. } => "AddInterestRange",
            Self::AddInterestMultiple { .. } => "AddInterestMultiple",
            Self::AddInterestResp { .. } => "AddInterestResp",
            Self::RemoveInterest { .. } => "RemoveInterest",
            Self::RemoveInterestRange { .. } => "RemoveInterestRange",
            Self::RemoveInterestMultiple { .. } => "RemoveInterestMultiple",
            Self::RemoveInterestResp { .. } => "RemoveInterestResp",
            Self::DiscoverService { .. } => "DiscoverService",
            Self::DiscoverServiceResp { .. } => "DiscoverServiceResp",
            Self::CloseService { .. } => "CloseService",
        }
    }
}

/// The JSON wrapper every client packet travels in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// Sender-side sequence number.
    pub seq: u64,
    /// Sender clock in milliseconds.
    pub timestamp: u64,
    pub message: ClientMessage,
}
