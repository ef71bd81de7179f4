//! Services on the arcmesh bus.
//!
//! - [`ServiceRegistry`] / [`ServiceHost`]: named services, discoverable
//!   by name on their discovery channel.
//! - [`RpcDispatcher`]: method calls on distributed objects, routed by
//!   an explicit (type, method) table.
//! - [`ObjectStub`]: the calling side, a plain handle on one object.

mod error;
mod host;
mod registry;
mod rpc;
mod stub;

pub use error::ServiceError;
pub use host::{QUERY_KIND, ServiceHost, discover};
pub use registry::{ServiceEntry, ServiceRegistry};
pub use rpc::{RpcCall, RpcDispatcher, RpcHandler};
pub use stub::ObjectStub;
