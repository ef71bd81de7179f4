//! Internal bus messages.
//!
//! A bus payload is a little-endian `u16` message type followed by the
//! JSON body of a [`BusMessage`]. The code lets a consumer route on
//! [`Message::msg_type`] without parsing the body.

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, JsonCodec};
use crate::{Channel, Doid, FieldValue, Message, ProtocolError};

/// Stable numeric codes of every [`BusMessage`] variant.
pub mod codes {
    // Director control
    pub const ADD_INTEREST: u16 = 9000;
    pub const REMOVE_INTEREST: u16 = 9001;
    pub const ADD_INTEREST_MULTIPLE: u16 = 9002;
    pub const REMOVE_INTEREST_MULTIPLE: u16 = 9003;
    pub const ADD_INTEREST_RANGE: u16 = 9004;
    pub const REMOVE_INTEREST_RANGE: u16 = 9005;

    pub const QUERY_CHANNEL: u16 = 10;
    pub const QUERY_CHANNEL_RESP: u16 = 11;

    // State server
    pub const SS_GENERATE: u16 = 2000;
    pub const SS_GENERATE_RESP: u16 = 2001;
    pub const SS_DESTROY: u16 = 2002;
    pub const SS_DESTROY_RESP: u16 = 2003;
    pub const SS_DISPENSE_ID: u16 = 2004;
    pub const SS_DISPENSE_ID_RESP: u16 = 2005;
    pub const SS_GET_REQUIRED: u16 = 2010;
    pub const SS_GET_REQUIRED_RESP: u16 = 2011;
    pub const SS_GET_ALL: u16 = 2012;
    pub const SS_GET_ALL_RESP: u16 = 2013;
    pub const SS_GET_FIELD: u16 = 2014;
    pub const SS_GET_FIELD_RESP: u16 = 2015;
    pub const SS_SET_FIELD: u16 = 2020;
    pub const SS_SET_FIELD_RESP: u16 = 2021;
    pub const SS_SET_FIELDS: u16 = 2022;
    pub const SS_SET_FIELDS_RESP: u16 = 2023;
    pub const SS_DISCOVER_CHILDREN: u16 = 2030;
    pub const SS_DISCOVER_CHILDREN_RESP: u16 = 2031;
    pub const SS_SET_PARENT: u16 = 2032;
    pub const SS_SET_PARENT_RESP: u16 = 2033;
    pub const SS_OBJECT_DESTROYED: u16 = 2040;
    pub const SS_OBJECT_MOVED: u16 = 2041;

    // Distributed objects
    pub const DOBJECT_BROADCAST_UPDATE: u16 = 2100;
    pub const DOBJECT_BROADCAST_RPC: u16 = 2101;
    pub const DOBJECT_BROADCAST_RPC_RESP: u16 = 2102;

    // Client agent control
    pub const CA_SET_STATUS: u16 = 1000;
    pub const CA_SET_CLIENT_ID: u16 = 1001;
    pub const CA_SEND_DATAGRAM: u16 = 1002;
    pub const CA_EJECT: u16 = 1003;
    pub const CA_OPEN_CHANNEL: u16 = 1004;
    pub const CA_CLOSE_CHANNEL: u16 = 1005;
    pub const CA_GENERATE: u16 = 1006;
    pub const CA_DESTROY: u16 = 1007;
    pub const CA_ADD_POST_REMOVE: u16 = 1008;
    pub const CA_CLEAR_POST_REMOVE: u16 = 1009;

    // Services
    pub const DISCOVER_SERVICE: u16 = 3000;
    pub const DISCOVER_SERVICE_RESP: u16 = 3001;
    pub const SERVICE_DATAGRAM: u16 = 3002;
}

/// Why the authority refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum StateFailure {
    #[error("no object {0}")]
    MissingObject(Doid),
    #[error("unknown type {0}")]
    UnknownType(u16),
    #[error("type {type_id} has no field {field}")]
    UnknownField { type_id: u16, field: u16 },
    #[error("doid {0} already in use")]
    DoidInUse(Doid),
    #[error("invalid parent {0}")]
    InvalidParent(Doid),
    /// A caller-supplied channel lies in the reserved space.
    #[error("channel {0} is reserved")]
    ReservedChannel(Channel),
    #[error("{0}")]
    Other(String),
}

/// A copy of an object's header and a selection of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub doid: Doid,
    pub type_id: u16,
    pub parent: Doid,
    pub owner: Channel,
    pub fields: Vec<(u16, FieldValue)>,
}

impl ObjectSnapshot {
    /// Value of one field, if the snapshot carries it.
    pub fn field(&self, id: u16) -> Option<&FieldValue> {
        self.fields.iter().find(|(f, _)| *f == id).map(|(_, v)| v)
    }
}

/// Every message that travels between cluster processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusMessage {
    // -- director control (CONTROL_CHANNEL) --
    AddInterest { channel: Channel },
    RemoveInterest { channel: Channel },
    AddInterestMultiple { channels: Vec<Channel> },
    RemoveInterestMultiple { channels: Vec<Channel> },
    AddInterestRange { low: Channel, high: Channel },
    RemoveInterestRange { low: Channel, high: Channel },

    /// Liveness / type probe any participant may answer.
    QueryChannel,
    QueryChannelResp { kind: String, name: String },

    // -- state server --
    Generate {
        /// `Doid::NONE` asks the authority to dispense one.
        doid: Doid,
        type_id: u16,
        parent: Doid,
        owner: Channel,
        fields: Vec<(u16, FieldValue)>,
    },
    GenerateResp { result: Result<Doid, StateFailure> },
    Destroy { doid: Doid },
    /// On success, every doid removed by the cascade.
    DestroyResp { doid: Doid, result: Result<Vec<Doid>, StateFailure> },
    DispenseId,
    DispenseIdResp { doid: Doid },
    GetRequired { doid: Doid },
    GetRequiredResp { doid: Doid, result: Result<ObjectSnapshot, StateFailure> },
    GetAll { doid: Doid },
    GetAllResp { doid: Doid, result: Result<ObjectSnapshot, StateFailure> },
    GetField { doid: Doid, field: u16 },
    GetFieldResp {
        doid: Doid,
        field: u16,
        result: Result<FieldValue, StateFailure>,
    },
    SetField {
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
        correlation: u32,
    },
    SetFieldResp {
        doid: Doid,
        field: u16,
        result: Result<(), StateFailure>,
    },
    SetFields {
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
        correlation: u32,
    },
    SetFieldsResp { doid: Doid, result: Result<(), StateFailure> },
    DiscoverChildren { doid: Doid },
    DiscoverChildrenResp { doid: Doid, result: Result<Vec<Doid>, StateFailure> },
    SetParent { doid: Doid, parent: Doid },
    SetParentResp { doid: Doid, result: Result<(), StateFailure> },
    ObjectDestroyed { doid: Doid },
    ObjectMoved {
        doid: Doid,
        old_parent: Doid,
        new_parent: Doid,
    },

    // -- distributed objects --
    BroadcastUpdate {
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
        correlation: u32,
    },
    BroadcastRpc {
        doid: Doid,
        method: u16,
        args: FieldValue,
        sender: Channel,
        correlation: u32,
    },
    BroadcastRpcResp {
        doid: Doid,
        method: u16,
        result: Result<FieldValue, String>,
    },

    // -- client agent control (addressed to a client channel) --
    ClientSetStatus { authenticated: bool },
    ClientSetId { channel: Channel },
    ClientSendDatagram { data: Vec<u8> },
    ClientEject { code: u16, reason: String },
    ClientOpenChannel { channel: Channel },
    ClientCloseChannel { channel: Channel },
    ClientGenerate { doid: Doid },
    ClientDestroy { doid: Doid },
    /// `frame` is an encoded [`Message`] sent when the client disconnects.
    ClientAddPostRemove { frame: Vec<u8> },
    ClientClearPostRemove,

    // -- services --
    DiscoverService { name: String },
    DiscoverServiceResp {
        name: String,
        channel: Option<Channel>,
        anonymous: bool,
    },
    ServiceDatagram { sender: Channel, data: Vec<u8> },
}

impl BusMessage {
    /// The stable message type code of this variant.
    pub fn code(&self) -> u16 {
        use codes::*;
        match self {
            Self::AddInterest { .. } => ADD_INTEREST,
            Self::RemoveInterest { .. } => REMOVE_INTEREST,
            Self::AddInterestMultiple { .. } => ADD_INTEREST_MULTIPLE,
            Self::RemoveInterestMultiple { .. } => REMOVE_INTEREST_MULTIPLE,
            Self::AddInterestRange { .. } => ADD_INTEREST_RANGE,
            Self::RemoveInterestRange { .. } => REMOVE_INTEREST_RANGE,
            Self::QueryChannel => QUERY_CHANNEL,
            Self::QueryChannelResp { .. } => QUERY_CHANNEL_RESP,
            Self::Generate { .. } => SS_GENERATE,
            Self::GenerateResp { .. } => SS_GENERATE_RESP,
            Self::Destroy { .. } => SS_DESTROY,
            Self::DestroyResp { .. } => SS_DESTROY_RESP,
            Self::DispenseId => SS_DISPENSE_ID,
            Self::DispenseIdResp { .. } => SS_DISPENSE_ID_RESP,
            Self::GetRequired { .. } => SS_GET_REQUIRED,
            Self::GetRequiredResp { .. } => SS_GET_REQUIRED_RESP,
            Self::GetAll { .. } => SS_GET_ALL,
            Self::GetAllResp { .. } => SS_GET_ALL_RESP,
            Self::GetField { .. } => SS_GET_FIELD,
            Self::GetFieldResp { .. } => SS_GET_FIELD_RESP,
            Self::SetField { .. } => SS_SET_FIELD,
            Self::SetFieldResp { .. } => SS_SET_FIELD_RESP,
            Self::SetFields { .. } => SS_SET_FIELDS,
            Self::SetFieldsResp { .. } => SS_SET_FIELDS_RESP,
            Self::DiscoverChildren { .. } => SS_DISCOVER_CHILDREN,
            Self::DiscoverChildrenResp { .. } => SS_DISCOVER_CHILDREN_RESP,
            Self::SetParent { .. } => SS_SET_PARENT,
            Self::SetParentResp { .. } => SS_SET_PARENT_RESP,
            Self::ObjectDestroyed { .. } => SS_OBJECT_DESTROYED,
            Self::ObjectMoved { .. } => SS_OBJECT_MOVED,
            Self::BroadcastUpdate { .. } => DOBJECT_BROADCAST_UPDATE,
            Self::BroadcastRpc { .. } => DOBJECT_BROADCAST_RPC,
            Self::BroadcastRpcResp { .. } => DOBJECT_BROADCAST_RPC_RESP,
            Self::ClientSetStatus { .. } => CA_SET_STATUS,
            Self::ClientSetId { .. } => CA_SET_CLIENT_ID,
            Self::ClientSendDatagram { .. } => CA_SEND_DATAGRAM,
            Self::ClientEject { .. } => CA_EJECT,
            Self::ClientOpenChannel { .. } => CA_OPEN_CHANNEL,
            Self::ClientCloseChannel { .. } => CA_CLOSE_CHANNEL,
            Self::ClientGenerate { .. } => CA_GENERATE,
            Self::ClientDestroy { .. } => CA_DESTROY,
            Self::ClientAddPostRemove { .. } => CA_ADD_POST_REMOVE,
            Self::ClientClearPostRemove => CA_CLEAR_POST_REMOVE,
            Self::DiscoverService { .. } => DISCOVER_SERVICE,
            Self::DiscoverServiceResp { .. } => DISCOVER_SERVICE_RESP,
            Self::ServiceDatagram { .. } => SERVICE_DATAGRAM,
        }
    }

    /// Returns `true` for the six director control variants.
    pub fn is_control(&self) -> bool {
        (codes::ADD_INTEREST..=codes::REMOVE_INTEREST_RANGE).contains(&self.code())
    }

    /// Encodes this message as a payload (`u16 code | JSON`).
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] if the body can't be serialized.
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.code().to_le_bytes());
        JsonCodec.encode_into(self, &mut out)?;
        Ok(out)
    }

    /// Wraps this message in a [`Message`] addressed to `channels`.
    ///
    /// # Errors
    /// [`ProtocolError::Encode`] if the body can't be serialized.
    pub fn to_message(
        &self,
        channels: impl Into<Vec<Channel>>,
        from: Channel,
    ) -> Result<Message, ProtocolError> {
        Ok(Message::new(channels, from, self.to_payload()?))
    }

    /// Parses a payload produced by [`BusMessage::to_payload`].
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`] when the code is missing
    /// - [`ProtocolError::Decode`] when the body is not a bus message
    /// - [`ProtocolError::UnknownMsgType`] when the code disagrees with the body
    pub fn from_payload(payload: &[u8]) -> Result<BusMessage, ProtocolError> {
        if payload.len() < 2 {
            return Err(ProtocolError::Truncated {
                needed: 2,
                available: payload.len(),
            });
        }
        let code = u16::from_le_bytes([payload[0], payload[1]]);
        let message: BusMessage = JsonCodec.decode(&payload[2..])?;
        if message.code() != code {
            return Err(ProtocolError::UnknownMsgType(code));
        }
        Ok(message)
    }

    /// Parses the payload of `message`.
    ///
    /// # Errors
    /// See [`BusMessage::from_payload`].
    pub fn from_message(message: &Message) -> Result<BusMessage, ProtocolError> {
        Self::from_payload(&message.payload)
    }
}
