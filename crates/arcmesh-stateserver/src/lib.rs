//! Distributed object authority for arcmesh.
//!
//! The state server owns every distributed object: its type, parent,
//! owner, and stored fields. Writes are broadcast to the object's mirror
//! channels according to each field's visibility flags.
//!
//! # Key types
//!
//! - [`ObjectAuthority`]: the operations, as an async trait
//! - [`StateServer`]: the local authority, attachable to a router
//! - [`StateServerClient`]: the same operations over the bus
//! - [`broadcast_targets`]: who hears about a field update

mod authority;
mod client;
mod config;
mod error;
mod object;
mod server;
mod table;

pub use authority::ObjectAuthority;
pub use client::StateServerClient;
pub use config::StateServerConfig;
pub use error::StateServerError;
pub use object::{DistributedObject, GenerateRequest, broadcast_targets};
pub use server::{QUERY_KIND, StateServer};
pub use table::{FieldUpdate, ObjectTable};
