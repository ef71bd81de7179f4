//! Message director tree and routing for arcmesh.
//!
//! - [`Director`]: one node of an in-process director tree. Interest
//!   flows up, messages fan out to exactly the directors that want them.
//! - [`Router`]: handlers bound to channels on a leaf, with reference
//!   counted interest and request/reply ([`Router::request`]).
//! - [`connect_upstream`] / [`DirectorServer`]: links between trees in
//!   different processes over any [`arcmesh_transport::Transport`].
//! - [`spawn_pump_loop`]: drives pumping on an interval.

mod config;
mod director;
mod error;
mod history;
mod interest;
mod link;
mod pump;
mod request;
mod router;

pub use config::{DirectorConfig, PumpConfig, RequestConfig};
pub use director::{Director, DirectorKind, NodeId, Origin};
pub use error::{DirectorError, RequestError};
pub use history::History;
pub use interest::{InterestTable, expand_range};
pub use link::{DirectorServer, connect_upstream, serve_peer};
pub use pump::{Pump, PumpHandle, spawn_pump_loop};
pub use router::{Handler, HandlerError, HandlerFault, RouteId, Router};
