//! Client sessions for the arcmesh client agent.
//!
//! - [`ClientState`]: the NewClient → Unauthenticated → Authenticated
//!   state machine, with Rejected reachable from anywhere.
//! - [`Session`]: one connection's interests, object pointers, echo
//!   suppression ids, discovered services, and disconnect messages.
//! - [`security`]: the send checks applied to every field set and RPC.
//! - [`SessionRegistry`]: client channel allocation and eject-by-channel.
//! - [`DisconnectCode`]: why a client was dropped.

mod disconnect;
mod error;
mod registry;
pub mod security;
mod session;
mod state;

pub use disconnect::DisconnectCode;
pub use error::SessionError;
pub use registry::{EjectRequest, RegistryConfig, SessionRegistry};
pub use session::{DiscoveredService, ObjectPointer, Session, SessionConfig};
pub use state::ClientState;
