//! `ClientAgent` builder and accept loop.
//!
//! The agent is the edge of the cluster: it accepts client connections,
//! gives each one a leaf on the director tree, and bridges client packets
//! to bus messages and back.

use std::sync::Arc;

use arcmesh_director::{Director, DirectorConfig, PumpConfig, spawn_pump_loop};
use arcmesh_protocol::SchemaRegistry;
use arcmesh_session::SessionRegistry;
use arcmesh_transport::{Connection, Transport, TransportError, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{AgentConfig, ArcmeshError};

/// State shared by every connection worker of one agent.
pub(crate) struct AgentShared {
    pub(crate) config: AgentConfig,
    pub(crate) schema: Arc<SchemaRegistry>,
    pub(crate) sessions: Arc<SessionRegistry>,
    /// Parent of every connection's leaf.
    pub(crate) node: Director,
}

/// Builder for a [`ClientAgent`].
///
/// # Example
///
/// ```rust,ignore
/// use arcmesh::prelude::*;
///
/// let agent = ClientAgent::builder()
///     .bind("0.0.0.0:7198")
///     .schema(schema)
///     .director(&root)
///     .build()?;
/// agent.run().await
/// ```
pub struct ClientAgentBuilder {
    config: AgentConfig,
    parent: Option<Director>,
    schema: Option<Arc<SchemaRegistry>>,
    sessions: Option<Arc<SessionRegistry>>,
}

impl ClientAgentBuilder {
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
            parent: None,
            schema: None,
            sessions: None,
        }
    }

    /// Sets the address [`ClientAgent::run`] listens on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the whole configuration, bind address included.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches the agent below `parent` in an existing tree, whose owner
    /// is responsible for pumping it. Without this the agent creates and
    /// pumps a tree of its own.
    pub fn director(mut self, parent: &Director) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// The object schema clients must match at hello time.
    pub fn schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Shares a session registry, e.g. with whatever ejects clients.
    pub fn sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Without a schema, clients must present the hash of an empty one.
    ///
    /// # Errors
    /// [`ArcmeshError::Director`] if `parent` is a leaf or detached.
    pub fn build(self) -> Result<ClientAgent, ArcmeshError> {
        let (node, own_root) = match self.parent {
            Some(parent) => (parent.add_node()?, None),
            None => {
                let root = Director::root(DirectorConfig::default());
                (root.add_node()?, Some(root))
            }
        };
        let schema = self.schema.unwrap_or_default();
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(SessionRegistry::new(self.config.registry.clone())));

        Ok(ClientAgent {
            shared: Arc::new(AgentShared {
                config: self.config,
                schema,
                sessions,
                node,
            }),
            own_root,
        })
    }
}

impl Default for ClientAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts client connections and runs one worker task per connection.
pub struct ClientAgent {
    shared: Arc<AgentShared>,
    own_root: Option<Director>,
}

impl ClientAgent {
    pub fn builder() -> ClientAgentBuilder {
        ClientAgentBuilder::new()
    }

    /// The director node the agent's connections hang off.
    pub fn director(&self) -> &Director {
        &self.shared.node
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.shared.sessions
    }

    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    /// Binds a WebSocket listener on the configured address and serves it.
    ///
    /// # Errors
    /// [`ArcmeshError::Transport`] if the address can't be bound.
    pub async fn run(self) -> Result<(), ArcmeshError> {
        let transport = WebSocketTransport::bind(&self.shared.config.bind_addr).await?;
        if let Ok(addr) = transport.local_addr() {
            tracing::info!(%addr, "client agent listening");
        }
        self.serve(transport).await
    }

    /// Runs the accept loop on any transport until it shuts down.
    ///
    /// Each connection gets its own task; a failing connection never
    /// stops the loop.
    pub async fn serve<T>(self, mut transport: T) -> Result<(), ArcmeshError>
    where
        T: Transport<Error = TransportError>,
        T::Connection: Connection<Error = TransportError>,
    {
        let root_pump = self
            .own_root
            .map(|root| spawn_pump_loop(root, PumpConfig::host()));
        tracing::info!(node = %self.shared.node.id(), "client agent running");

        loop {
            match transport.accept().await {
                Ok(conn) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, shared).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(TransportError::Shutdown) => break,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        tracing::info!("client agent stopped accepting");
        if let Some(handle) = root_pump {
            handle.stop().await;
        }
        Ok(())
    }
}
