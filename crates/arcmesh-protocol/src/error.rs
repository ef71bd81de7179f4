//! Error types for the protocol layer.

/// Errors that can occur while framing, encoding, or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a body to JSON failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Parsing a JSON body failed (malformed, missing fields, wrong shape).
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The bytes parse but break a framing or protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A message may address at most 255 channels.
    #[error("too many channels: {0} (max 255)")]
    TooManyChannels(usize),

    /// The frame length would not fit the u16 length prefix.
    #[error("message too large: {0} bytes (max 65535)")]
    MessageTooLarge(usize),

    /// The input ended before the frame it announced.
    #[error("truncated frame: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    /// The payload's message type code is not one this layer understands.
    #[error("unknown message type {0}")]
    UnknownMsgType(u16),

    /// A schema definition is inconsistent.
    #[error("schema error: {0}")]
    Schema(String),
}
