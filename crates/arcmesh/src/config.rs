//! Configuration for the client agent and for a single-process cluster.
//!
//! Everything deserializes with `#[serde(default)]`, so a host only needs
//! to spell out what it changes. Durations are in milliseconds.

use std::time::Duration;

use arcmesh_director::{DirectorConfig, PumpConfig, RequestConfig};
use arcmesh_session::{RegistryConfig, SessionConfig};
use arcmesh_stateserver::StateServerConfig;
use serde::Deserialize;

/// Settings for a [`ClientAgent`](crate::ClientAgent).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address [`ClientAgent::run`](crate::ClientAgent::run) listens on.
    pub bind_addr: String,
    /// How long a new connection has to send its `Hello`.
    pub hello_timeout_ms: u64,
    /// Eject clients silent for this long. `0` disables the check.
    pub heartbeat_timeout_ms: u64,
    /// Deepest parent chain resolved when revealing an object.
    pub max_parent_depth: usize,
    /// Largest client frame accepted, in bytes.
    pub max_datagram_size: usize,
    /// Most doids one interest range may name.
    pub max_interest_range: u32,
    pub session: SessionConfig,
    pub registry: RegistryConfig,
    /// Pumping of each connection's router.
    pub pump: PumpConfig,
    /// State server queries.
    pub request: RequestConfig,
    /// Method calls a client waits on.
    pub rpc: RequestConfig,
    pub discovery: RequestConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7198".to_string(),
            hello_timeout_ms: 5_000,
            heartbeat_timeout_ms: 30_000,
            max_parent_depth: 32,
            max_datagram_size: 65_535,
            max_interest_range: 4_096,
            session: SessionConfig::default(),
            registry: RegistryConfig::default(),
            pump: PumpConfig::detached(),
            request: RequestConfig::bus(),
            rpc: RequestConfig::client_rpc(),
            discovery: RequestConfig::discovery(),
        }
    }
}

impl AgentConfig {
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    /// `None` when heartbeats are not enforced.
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        (self.heartbeat_timeout_ms > 0).then(|| Duration::from_millis(self.heartbeat_timeout_ms))
    }
}

/// Everything one process needs to host a director root, a state server,
/// and a client agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub director: DirectorConfig,
    /// Pumping of the director root.
    pub pump: PumpConfig,
    pub agent: AgentConfig,
    pub state_server: StateServerConfig,
    /// Filter used when `RUST_LOG` is unset.
    pub log: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            director: DirectorConfig::default(),
            pump: PumpConfig::host(),
            agent: AgentConfig::default(),
            state_server: StateServerConfig::default(),
            log: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.hello_timeout(), Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.pump, PumpConfig::detached());
        assert_eq!(config.rpc, RequestConfig::client_rpc());
    }

    #[test]
    fn test_zero_heartbeat_disables_check() {
        let config = AgentConfig {
            heartbeat_timeout_ms: 0,
            ..AgentConfig::default()
        };
        assert_eq!(config.heartbeat_timeout(), None);
    }

    #[test]
    fn test_partial_cluster_config_keeps_defaults() {
        let json = r#"{
            "log": "arcmesh=debug",
            "agent": { "bind_addr": "0.0.0.0:9000", "request": { "retries": 5 } }
        }"#;
        let config: ClusterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.log, "arcmesh=debug");
        assert_eq!(config.agent.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.agent.request.retries, 5);
        assert_eq!(config.agent.request.timeout_ms, RequestConfig::bus().timeout_ms);
        assert_eq!(config.agent.hello_timeout_ms, 5_000);
        assert_eq!(config.state_server, StateServerConfig::default());
    }
}
