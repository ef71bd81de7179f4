//! Wire protocol for arcmesh.
//!
//! - **Addressing** ([`Channel`], [`Doid`], prefix helpers): how 64-bit
//!   channels are composed from a class prefix and a value.
//! - **Framing** ([`Message`], [`encode_batch`], [`decode_batch`]): the
//!   binary envelope every bus message travels in.
//! - **Bus** ([`BusMessage`]): the typed payloads cluster processes
//!   exchange, each with a stable `u16` code.
//! - **Client packets** ([`ClientEnvelope`], [`ClientMessage`]): what the
//!   client agent speaks to external clients.
//! - **Schema** ([`SchemaRegistry`]): type ids → fields, methods, and
//!   their visibility flags.
//!
//! ```text
//! Transport (bytes) → Protocol (Message / ClientEnvelope) → Director / Agent
//! ```

mod bus;
mod channel;
mod client;
mod codec;
mod error;
mod message;
mod schema;

pub use bus::{BusMessage, ObjectSnapshot, StateFailure, codes};
pub use channel::{
    AI_PREFIX, CALLBACK_PREFIX, CLIENT_MIRROR_PREFIX, CLIENT_PREFIX, CONTROL_CHANNEL, Channel,
    ChannelClass, Doid, OBJECT_PREFIX, RESERVED_LIMIT, SERVICE_DISCOVERY_PREFIX, SERVICE_PREFIX,
    STATE_SERVER_CHANNEL, ai_channel, client_channel, client_mirror_channel, combine,
    is_reserved, object_channel, random_callback_channel, service_channel,
    service_discovery_channel, split_prefix, split_value,
};
pub use client::{ClientEnvelope, ClientMessage, PROTOCOL_VERSION};
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use message::{MAX_CHANNELS, MAX_FRAME_LEN, Message, decode_batch, encode_batch};
pub use schema::{
    FieldDef, FieldValue, MemberFlags, MethodDef, SchemaRegistry, SchemaRegistryBuilder,
    TypeDef,
};
