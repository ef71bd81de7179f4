//! Error types for the director layer.

use arcmesh_protocol::{Channel, ProtocolError};

use crate::NodeId;

/// Errors raised by directors, links, and routers.
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    /// A message could not be framed or parsed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `low` is above `high`.
    #[error("invalid interest range {low}..={high}")]
    InvalidRange { low: Channel, high: Channel },

    /// The range would expand to more channels than allowed.
    #[error("interest range spans {span} channels (max {max})")]
    RangeTooLarge { span: u64, max: u64 },

    /// Leaves are consumer-facing and cannot parent other directors.
    #[error("{0} is a leaf and cannot have children")]
    LeafHasNoChildren(NodeId),

    /// Only a root may own an upstream link.
    #[error("{0} is not a root")]
    NotRoot(NodeId),

    /// The director was removed from its tree.
    #[error("{0} is detached")]
    Detached(NodeId),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors returned by [`Router::request`](crate::Router::request).
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Every attempt timed out.
    #[error("no reply after {attempts} attempts")]
    NoReply { attempts: u32 },

    /// Sending the request failed.
    #[error(transparent)]
    Director(#[from] DirectorError),
}
