//! The 64-bit channel address space.
//!
//! A channel is the only addressing primitive on the bus. The high 32 bits
//! are a *prefix* naming a class of addressee, the low 32 bits a *value*
//! (usually a doid or a session number):
//!
//! ```text
//! ┌──────────────── 64 bits ────────────────┐
//! │  prefix (u32)       │  value (u32)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Everything here is pure and stateless.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Object's authoritative channel (state requests, `Broadcast` updates).
pub const OBJECT_PREFIX: u32 = 1;
/// Object's AI-owner mirror.
pub const AI_PREFIX: u32 = 2;
/// Object's client-visible mirror.
pub const CLIENT_MIRROR_PREFIX: u32 = 3;
/// A connected client session.
pub const CLIENT_PREFIX: u32 = 4;
/// Ephemeral request/reply correlation channels.
pub const CALLBACK_PREFIX: u32 = 5;
/// Service name → channel resolution.
pub const SERVICE_DISCOVERY_PREFIX: u32 = 6;
/// A service's own inbox.
pub const SERVICE_PREFIX: u32 = 7;

/// Director control messages. Consumed by the receiving director, never
/// propagated.
pub const CONTROL_CHANNEL: Channel = Channel(1);
/// Inbox of the object authority for requests not tied to a doid yet.
pub const STATE_SERVER_CHANNEL: Channel = Channel(1000);
/// Channels strictly below this value are reserved for infrastructure.
pub const RESERVED_LIMIT: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A 64-bit bus address.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Channel(pub u64);

/// Identifier of a distributed object. `0` is reserved and never dispensed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Doid(pub u32);

impl Doid {
    /// The reserved "no object" id, also used as "root" for parents.
    pub const NONE: Doid = Doid(0);

    /// Returns `true` for the reserved id.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Doid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D-{}", self.0)
    }
}

/// The class of addressee a channel's prefix names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelClass {
    Object,
    Ai,
    ClientMirror,
    Client,
    Callback,
    ServiceDiscovery,
    Service,
    /// Any other prefix, including the infrastructure range.
    Plain,
}

impl Channel {
    /// The anonymous sender.
    pub const NONE: Channel = Channel(0);

    /// Returns the high 32 bits.
    pub const fn prefix(self) -> u32 {
        split_prefix(self)
    }

    /// Returns the low 32 bits.
    pub const fn value(self) -> u32 {
        split_value(self)
    }

    /// Returns `true` for [`Channel::NONE`].
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Classifies the channel by its prefix.
    pub fn class(self) -> ChannelClass {
        match self.prefix() {
            OBJECT_PREFIX => ChannelClass::Object,
            AI_PREFIX => ChannelClass::Ai,
            CLIENT_MIRROR_PREFIX => ChannelClass::ClientMirror,
            CLIENT_PREFIX => ChannelClass::Client,
            CALLBACK_PREFIX => ChannelClass::Callback,
            SERVICE_DISCOVERY_PREFIX => ChannelClass::ServiceDiscovery,
            SERVICE_PREFIX => ChannelClass::Service,
            _ => ChannelClass::Plain,
        }
    }

    /// The doid carried by an object-family channel, if any.
    pub fn doid(self) -> Option<Doid> {
        match self.class() {
            ChannelClass::Object | ChannelClass::Ai | ChannelClass::ClientMirror => {
                Some(Doid(self.value()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix(), self.value())
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Builds a channel from a prefix and a value.
pub const fn combine(prefix: u32, value: u32) -> Channel {
    Channel(((prefix as u64) << 32) | value as u64)
}

/// Inverse of [`combine`] for the prefix half.
pub const fn split_prefix(channel: Channel) -> u32 {
    (channel.0 >> 32) as u32
}

/// Inverse of [`combine`] for the value half.
pub const fn split_value(channel: Channel) -> u32 {
    (channel.0 & 0xFFFF_FFFF) as u32
}

/// The authoritative channel of an object.
pub const fn object_channel(doid: Doid) -> Channel {
    combine(OBJECT_PREFIX, doid.0)
}

/// The AI-owner mirror of an object.
pub const fn ai_channel(doid: Doid) -> Channel {
    combine(AI_PREFIX, doid.0)
}

/// The client-visible mirror of an object.
pub const fn client_mirror_channel(doid: Doid) -> Channel {
    combine(CLIENT_MIRROR_PREFIX, doid.0)
}

/// The channel of the client session numbered `id`.
pub const fn client_channel(id: u32) -> Channel {
    combine(CLIENT_PREFIX, id)
}

/// The inbox channel of a service numbered `id`.
pub const fn service_channel(id: u32) -> Channel {
    combine(SERVICE_PREFIX, id)
}

/// Where discovery queries for `name` are sent.
pub fn service_discovery_channel(name: &str) -> Channel {
    combine(SERVICE_DISCOVERY_PREFIX, fnv1a32(name.as_bytes()))
}

/// A fresh callback channel for one request/reply exchange.
///
/// Values are random, not unique: a collision means two requests may see
/// each other's replies, which the at-most-once reply handling tolerates.
pub fn random_callback_channel() -> Channel {
    let value: u32 = rand::rng().random();
    combine(CALLBACK_PREFIX, value)
}

/// Returns `true` if a client must not be allowed to pick this channel.
pub fn is_reserved(channel: Channel) -> bool {
    channel.0 < RESERVED_LIMIT
        || matches!(
            channel.class(),
            ChannelClass::Object
                | ChannelClass::Ai
                | ChannelClass::ClientMirror
                | ChannelClass::Client
                | ChannelClass::Callback
        )
}

/// 32-bit FNV-1a. Stable across processes and builds.
fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_combine_split_round_trip(prefix in any::<u32>(), value in any::<u32>()) {
            let ch = combine(prefix, value);
            prop_assert_eq!(split_prefix(ch), prefix);
            prop_assert_eq!(split_value(ch), value);
        }

        #[test]
        fn prop_split_combine_round_trip(raw in any::<u64>()) {
            let ch = Channel(raw);
            prop_assert_eq!(combine(split_prefix(ch), split_value(ch)), ch);
        }
    }

    #[test]
    fn test_combine_zero_edges() {
        assert_eq!(combine(0, 0), Channel(0));
        assert_eq!(split_prefix(combine(0, 7)), 0);
        assert_eq!(split_value(combine(9, 0)), 0);
        assert_eq!(combine(u32::MAX, u32::MAX), Channel(u64::MAX));
    }

    #[test]
    fn test_object_family_channels_carry_doid() {
        let doid = Doid(7);
        assert_eq!(object_channel(doid).class(), ChannelClass::Object);
        assert_eq!(ai_channel(doid).class(), ChannelClass::Ai);
        assert_eq!(client_mirror_channel(doid).class(), ChannelClass::ClientMirror);
        assert_eq!(client_mirror_channel(doid).doid(), Some(doid));
        assert_eq!(client_channel(7).doid(), None);
    }

    #[test]
    fn test_callback_channel_has_callback_prefix() {
        let ch = random_callback_channel();
        assert_eq!(ch.class(), ChannelClass::Callback);
    }

    #[test]
    fn test_is_reserved_classes() {
        assert!(is_reserved(Channel(0)));
        assert!(is_reserved(STATE_SERVER_CHANNEL));
        assert!(is_reserved(Channel(RESERVED_LIMIT - 1)));
        assert!(is_reserved(object_channel(Doid(5))));
        assert!(is_reserved(client_channel(5)));
        assert!(is_reserved(random_callback_channel()));
        assert!(!is_reserved(Channel(RESERVED_LIMIT)));
        assert!(!is_reserved(service_channel(3)));
        assert!(!is_reserved(combine(99, 1)));
    }

    #[test]
    fn test_discovery_channel_is_stable_per_name() {
        assert_eq!(
            service_discovery_channel("login"),
            service_discovery_channel("login")
        );
        assert_ne!(
            service_discovery_channel("login"),
            service_discovery_channel("chat")
        );
        assert_eq!(
            service_discovery_channel("login").class(),
            ChannelClass::ServiceDiscovery
        );
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(combine(4, 12).to_string(), "4:12");
        assert_eq!(Doid(3).to_string(), "D-3");
    }
}
