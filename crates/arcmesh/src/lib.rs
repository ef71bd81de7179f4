//! # arcmesh
//!
//! Channel-addressed cluster middleware for multiplayer game servers.
//!
//! Cluster processes hang off a tree of message directors and talk over
//! 64-bit channels. A state server owns the distributed objects; a client
//! agent bridges external game clients onto the bus, enforcing who may
//! see and change what.
//!
//! ```text
//! clients ─▶ ClientAgent ─▶ Director tree ◀─ StateServer
//!                                 ▲
//!                          services / AI
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use arcmesh::prelude::*;
//!
//! # async fn start(schema: Arc<SchemaRegistry>) -> Result<(), ArcmeshError> {
//! arcmesh::logging::init("info");
//!
//! let root = Director::root(DirectorConfig::default());
//! let _root_pump = spawn_pump_loop(root.clone(), PumpConfig::host());
//!
//! let state = StateServer::new(Arc::clone(&schema), StateServerConfig::default());
//! let state_router = Arc::new(Router::new(root.add_leaf()?));
//! state.attach(Arc::clone(&state_router));
//! let _state_pump = spawn_pump_loop(state_router, PumpConfig::host());
//!
//! ClientAgent::builder()
//!     .bind("0.0.0.0:7198")
//!     .schema(schema)
//!     .director(&root)
//!     .build()?
//!     .run()
//!     .await
//! # }
//! ```

mod agent;
mod config;
mod error;
mod handler;
pub mod logging;

pub use agent::{ClientAgent, ClientAgentBuilder};
pub use config::{AgentConfig, ClusterConfig};
pub use error::ArcmeshError;

/// Everything a cluster process usually needs.
pub mod prelude {
    pub use crate::{AgentConfig, ArcmeshError, ClientAgent, ClientAgentBuilder, ClusterConfig};
    pub use arcmesh_director::{
        Director, DirectorConfig, PumpConfig, PumpHandle, RequestConfig, RequestError, Router,
        spawn_pump_loop,
    };
    pub use arcmesh_protocol::{
        BusMessage, Channel, ClientEnvelope, ClientMessage, Doid, FieldDef, FieldValue,
        MemberFlags, Message, MethodDef, PROTOCOL_VERSION, SchemaRegistry, TypeDef,
    };
    pub use arcmesh_services::{
        ObjectStub, RpcDispatcher, ServiceEntry, ServiceHost, ServiceRegistry,
    };
    pub use arcmesh_session::{DisconnectCode, SessionRegistry};
    pub use arcmesh_stateserver::{
        GenerateRequest, ObjectAuthority, StateServer, StateServerClient, StateServerConfig,
    };
    pub use arcmesh_transport::{Connection, MemoryTransport, Transport, WebSocketTransport};
}
