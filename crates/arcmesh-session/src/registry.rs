//! Live sessions of one client agent.

use std::collections::HashMap;

use arcmesh_protocol::{Channel, ChannelClass, client_channel};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{DisconnectCode, SessionError};

/// Range of client ids an agent hands out.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub first_client_id: u32,
    /// Inclusive.
    pub last_client_id: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            first_client_id: 1,
            last_client_id: u32::MAX,
        }
    }
}

/// Request to end a session, delivered to its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EjectRequest {
    pub code: DisconnectCode,
    pub reason: String,
}

struct RegistryState {
    next_id: u32,
    live: HashMap<Channel, mpsc::UnboundedSender<EjectRequest>>,
}

/// Dispenses client channels and tracks which sessions are alive.
///
/// Shared by every connection worker of an agent. Each worker registers
/// an eject sender so other parts of the agent can end its session.
pub struct SessionRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let next_id = config.first_client_id;
        Self {
            config,
            state: Mutex::new(RegistryState {
                next_id,
                live: HashMap::new(),
            }),
        }
    }

    /// Allocates a client channel for a new session.
    ///
    /// Ids are handed out in order and wrap around; ids still in use are
    /// skipped.
    ///
    /// # Errors
    /// [`SessionError::ChannelsExhausted`] when every id is taken.
    pub fn register(
        &self,
        eject: mpsc::UnboundedSender<EjectRequest>,
    ) -> Result<Channel, SessionError> {
        let first = self.config.first_client_id;
        let last = self.config.last_client_id.max(first);
        let span = u64::from(last - first) + 1;

        let mut state = self.state.lock();
        for _ in 0..span.min(state.live.len() as u64 + 1) {
            let id = state.next_id;
            state.next_id = if id >= last { first } else { id + 1 };
            let channel = client_channel(id);
            if !state.live.contains_key(&channel) {
                state.live.insert(channel, eject);
                tracing::debug!(%channel, live = state.live.len(), "session registered");
                return Ok(channel);
            }
        }
        Err(SessionError::ChannelsExhausted)
    }

    /// Moves a session to another channel (bus `SetClientId`).
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if `old` is not live
    /// - [`SessionError::AlreadyRegistered`] if `new` is taken
    /// - [`SessionError::ReservedChannel`] if `new` is outside the client range
    pub fn rekey(&self, old: Channel, new: Channel) -> Result<(), SessionError> {
        if new.class() != ChannelClass::Client {
            return Err(SessionError::ReservedChannel(new));
        }
        let mut state = self.state.lock();
        if state.live.contains_key(&new) {
            return Err(SessionError::AlreadyRegistered(new));
        }
        let eject = state.live.remove(&old).ok_or(SessionError::NotFound(old))?;
        state.live.insert(new, eject);
        Ok(())
    }

    /// Returns `true` if the session existed.
    pub fn unregister(&self, channel: Channel) -> bool {
        let removed = self.state.lock().live.remove(&channel).is_some();
        if removed {
            tracing::debug!(%channel, "session unregistered");
        }
        removed
    }

    /// Asks the session on `channel` to disconnect.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if no live session has that channel.
    pub fn eject(
        &self,
        channel: Channel,
        code: DisconnectCode,
        reason: impl Into<String>,
    ) -> Result<(), SessionError> {
        let state = self.state.lock();
        let tx = state.live.get(&channel).ok_or(SessionError::NotFound(channel))?;
        tx.send(EjectRequest {
            code,
            reason: reason.into(),
        })
        .map_err(|_| SessionError::NotFound(channel))
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.state.lock().live.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
