//! The message envelope and its binary frame.
//!
//! ```text
//! ┌──────────┬─────────┬──────────────────┬──────────┬─────────┐
//! │ u16 len  │ u8 n    │ n × u64 channel  │ u64 from │ payload │
//! └──────────┴─────────┴──────────────────┴──────────┴─────────┘
//!   len = 8·(n+1) + 1 + payload.len()
//! ```
//!
//! All integers are little-endian. A transport frame carries a *batch*:
//! `i32 count` followed by `count` message frames.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Channel, ProtocolError};

/// Maximum destination channels per message.
pub const MAX_CHANNELS: usize = u8::MAX as usize;

/// Largest value the length prefix can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// One unit of bus traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination channels, in the order the sender listed them.
    pub channels: Vec<Channel>,
    /// The sender, or [`Channel::NONE`] when anonymous.
    pub from: Channel,
    /// Opaque body. See [`crate::BusMessage`] for the convention used
    /// by arcmesh components.
    pub payload: Bytes,
}

impl Message {
    /// Creates a message addressed to `channels`.
    pub fn new(
        channels: impl Into<Vec<Channel>>,
        from: Channel,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channels: channels.into(),
            from,
            payload: payload.into(),
        }
    }

    /// Length written in the `u16` prefix (everything after the prefix).
    pub fn wire_len(&self) -> usize {
        8 * (self.channels.len() + 1) + 1 + self.payload.len()
    }

    /// Returns `true` if any destination satisfies `wanted`.
    pub fn targets_any(&self, mut wanted: impl FnMut(Channel) -> bool) -> bool {
        self.channels.iter().any(|ch| wanted(*ch))
    }

    /// Peeks the `u16` message type at the start of the payload.
    pub fn msg_type(&self) -> Option<u16> {
        (self.payload.len() >= 2)
            .then(|| u16::from_le_bytes([self.payload[0], self.payload[1]]))
    }

    /// Best-effort identity used for duplicate suppression.
    ///
    /// Channel order does not matter. Collisions are possible and
    /// accepted: this is loop prevention, not message identity.
    pub fn structural_hash(&self) -> u64 {
        let payload = hash_of(&self.payload[..]);
        let channels = self
            .channels
            .iter()
            .fold(0u64, |acc, ch| acc ^ hash_of(&ch.0));
        payload ^ channels.rotate_left(17) ^ hash_of(&self.from.0).rotate_left(41)
    }

    /// Appends this message's frame to `buf`.
    ///
    /// # Errors
    /// - [`ProtocolError::TooManyChannels`] for more than 255 destinations
    /// - [`ProtocolError::MessageTooLarge`] when the frame would not fit the
    ///   `u16` length prefix
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(ProtocolError::TooManyChannels(self.channels.len()));
        }
        let len = self.wire_len();
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::MessageTooLarge(len));
        }
        buf.reserve(2 + len);
        buf.put_u16_le(len as u16);
        buf.put_u8(self.channels.len() as u8);
        for ch in &self.channels {
            buf.put_u64_le(ch.0);
        }
        buf.put_u64_le(self.from.0);
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Encodes this message as a standalone frame.
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Reads one frame from the front of `buf`, advancing it.
    ///
    /// # Errors
    /// - [`ProtocolError::Truncated`] when `buf` holds less than the frame
    /// - [`ProtocolError::InvalidMessage`] when the length prefix is
    ///   smaller than the header it describes
    pub fn decode(buf: &mut Bytes) -> Result<Message, ProtocolError> {
        need(buf, 2)?;
        let len = buf.get_u16_le() as usize;
        need(buf, len)?;
        if len < 9 {
            return Err(ProtocolError::InvalidMessage(format!(
                "frame length {len} shorter than header"
            )));
        }
        let mut frame = buf.split_to(len);
        let count = frame.get_u8() as usize;
        let header = 8 * (count + 1);
        if frame.remaining() < header {
            return Err(ProtocolError::InvalidMessage(format!(
                "frame length {len} cannot hold {count} channels"
            )));
        }
        let channels = (0..count).map(|_| Channel(frame.get_u64_le())).collect();
        let from = Channel(frame.get_u64_le());
        Ok(Message {
            channels,
            from,
            payload: frame,
        })
    }
}

/// Encodes messages into one transport frame.
pub fn encode_batch(messages: &[Message]) -> Result<Bytes, ProtocolError> {
    let count = i32::try_from(messages.len())
        .map_err(|_| ProtocolError::InvalidMessage("batch too large".into()))?;
    let mut buf = BytesMut::with_capacity(4 + messages.len() * 32);
    buf.put_i32_le(count);
    for msg in messages {
        msg.encode_into(&mut buf)?;
    }
    Ok(buf.freeze())
}

/// Decodes one transport frame into its messages.
///
/// The whole frame must be consumed; trailing bytes are an error.
pub fn decode_batch(data: &[u8]) -> Result<Vec<Message>, ProtocolError> {
    let mut buf = Bytes::copy_from_slice(data);
    need(&buf, 4)?;
    let count = buf.get_i32_le();
    if count < 0 {
        return Err(ProtocolError::InvalidMessage(format!(
            "negative batch count {count}"
        )));
    }
    // Every frame is at least 11 bytes, so cap the preallocation by what
    // the buffer can actually hold.
    let mut out = Vec::with_capacity((count as usize).min(buf.remaining() / 11));
    for _ in 0..count {
        out.push(Message::decode(&mut buf)?);
    }
    if buf.has_remaining() {
        return Err(ProtocolError::InvalidMessage(format!(
            "{} trailing bytes after batch",
            buf.remaining()
        )));
    }
    Ok(out)
}

fn need(buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn channels(n: usize) -> Vec<Channel> {
        (0..n as u64).map(|i| Channel(i * 7 + 3)).collect()
    }

    fn round_trip(msg: &Message) -> Message {
        let mut bytes = msg.to_bytes().expect("encode");
        let decoded = Message::decode(&mut bytes).expect("decode");
        assert!(bytes.is_empty(), "frame should be fully consumed");
        decoded
    }

    #[test]
    fn test_length_prefix_matches_formula() {
        let msg = Message::new(channels(3), Channel(9), vec![1u8, 2, 3, 4]);
        let bytes = msg.to_bytes().unwrap();
        let prefix = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        assert_eq!(prefix, 8 * (3 + 1) + 1 + 4);
        assert_eq!(bytes.len(), prefix + 2);
    }

    #[test]
    fn test_round_trip_zero_one_and_max_channels() {
        for n in [0, 1, MAX_CHANNELS] {
            let msg = Message::new(channels(n), Channel(42), vec![0xAB; 10]);
            assert_eq!(round_trip(&msg), msg);
        }
    }

    #[test]
    fn test_round_trip_empty_and_largest_payload() {
        let empty = Message::new(channels(1), Channel::NONE, Bytes::new());
        assert_eq!(round_trip(&empty), empty);

        // Largest payload the u16 prefix admits with no destinations.
        let largest = MAX_FRAME_LEN - 9;
        let msg = Message::new(Vec::new(), Channel(1), vec![7u8; largest]);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_oversized_payload_fails() {
        let msg = Message::new(channels(1), Channel(1), vec![0u8; 64 * 1024]);
        assert!(matches!(
            msg.to_bytes(),
            Err(ProtocolError::MessageTooLarge(_))
        ));
    }

    #[test]
    fn test_too_many_channels_fails() {
        let msg = Message::new(channels(MAX_CHANNELS + 1), Channel(1), Bytes::new());
        assert!(matches!(
            msg.to_bytes(),
            Err(ProtocolError::TooManyChannels(256))
        ));
    }

    #[test]
    fn test_decode_truncated_frame_fails() {
        let msg = Message::new(channels(2), Channel(5), vec![1u8, 2, 3]);
        let bytes = msg.to_bytes().unwrap();
        let mut short = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            Message::decode(&mut short),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decode_lying_channel_count_fails() {
        // Prefix says 9 bytes but the count byte claims 3 channels.
        let mut raw = BytesMut::new();
        raw.put_u16_le(9);
        raw.put_u8(3);
        raw.put_u64_le(0);
        let mut bytes = raw.freeze();
        assert!(matches!(
            Message::decode(&mut bytes),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_batch_round_trip() {
        let batch = vec![
            Message::new(channels(1), Channel(1), vec![1u8]),
            Message::new(channels(0), Channel(2), Bytes::new()),
            Message::new(channels(4), Channel(3), vec![3u8; 100]),
        ];
        let bytes = encode_batch(&batch).unwrap();
        assert_eq!(decode_batch(&bytes).unwrap(), batch);
    }

    #[test]
    fn test_batch_rejects_trailing_bytes_and_negative_count() {
        let mut bytes = encode_batch(&[Message::new(channels(1), Channel(1), vec![1u8])])
            .unwrap()
            .to_vec();
        bytes.push(0);
        assert!(decode_batch(&bytes).is_err());

        let negative = (-1i32).to_le_bytes();
        assert!(decode_batch(&negative).is_err());
    }

    #[test]
    fn test_structural_hash_ignores_channel_order() {
        let a = Message::new(vec![Channel(1), Channel(2)], Channel(9), vec![5u8]);
        let b = Message::new(vec![Channel(2), Channel(1)], Channel(9), vec![5u8]);
        assert_eq!(a.structural_hash(), b.structural_hash());

        let c = Message::new(vec![Channel(1), Channel(2)], Channel(8), vec![5u8]);
        assert_ne!(a.structural_hash(), c.structural_hash());
    }

    #[test]
    fn test_msg_type_peek() {
        let msg = Message::new(channels(1), Channel(1), vec![0x34u8, 0x12, 0xFF]);
        assert_eq!(msg.msg_type(), Some(0x1234));
        let short = Message::new(channels(1), Channel(1), vec![0x34u8]);
        assert_eq!(short.msg_type(), None);
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode_batch(&data);
        }
    }
}
