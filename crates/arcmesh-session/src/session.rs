//! Per-connection session state kept by the client agent.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use arcmesh_protocol::{Channel, Doid};
use rand::Rng;
use serde::Deserialize;
use tokio::time::Instant;

use crate::{ClientState, SessionError};

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a field-set correlation id suppresses its own echo.
    pub echo_window_ms: u64,
    /// Oldest correlation ids are forgotten past this many.
    pub max_pending_correlations: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            echo_window_ms: 2_000,
            max_pending_correlations: 1_024,
        }
    }
}

impl SessionConfig {
    pub fn echo_window(&self) -> Duration {
        Duration::from_millis(self.echo_window_ms)
    }
}

/// What a session knows about an object it has been shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPointer {
    pub doid: Doid,
    pub parent: Doid,
    pub owner: Channel,
    pub type_id: u16,
}

/// A service the client looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub name: String,
    pub channel: Channel,
    /// Reachable before authentication.
    pub anonymous: bool,
}

/// One connected client, as seen by its agent worker.
///
/// Owned by a single worker task; nothing here is shared.
#[derive(Debug)]
pub struct Session {
    channel: Channel,
    state: ClientState,
    interests: BTreeSet<Doid>,
    objects: HashMap<Doid, ObjectPointer>,
    pending: VecDeque<(u32, Instant)>,
    services: HashMap<String, DiscoveredService>,
    post_remove: Vec<Vec<u8>>,
    config: SessionConfig,
}

impl Session {
    pub fn new(channel: Channel, config: SessionConfig) -> Self {
        Self {
            channel,
            state: ClientState::NewClient,
            interests: BTreeSet::new(),
            objects: HashMap::new(),
            pending: VecDeque::new(),
            services: HashMap::new(),
            post_remove: Vec::new(),
            config,
        }
    }

    /// The session's own client channel.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Moves to a new client channel (bus `SetClientId`).
    pub fn set_channel(&mut self, channel: Channel) {
        tracing::debug!(old = %self.channel, new = %channel, "client channel changed");
        self.channel = channel;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// # Errors
    /// [`SessionError::InvalidTransition`] for an illegal move.
    pub fn transition(&mut self, to: ClientState) -> Result<(), SessionError> {
        let from = self.state;
        self.state = from.transition(to)?;
        if from != to {
            tracing::debug!(channel = %self.channel, ?from, ?to, "session state changed");
        }
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    // -- interest --------------------------------------------------------

    /// Returns `true` if the doid was not already declared.
    pub fn add_interest(&mut self, doid: Doid) -> bool {
        self.interests.insert(doid)
    }

    pub fn remove_interest(&mut self, doid: Doid) -> bool {
        self.interests.remove(&doid)
    }

    pub fn has_interest(&self, doid: Doid) -> bool {
        self.interests.contains(&doid)
    }

    pub fn interests(&self) -> impl Iterator<Item = Doid> + '_ {
        self.interests.iter().copied()
    }

    /// Returns `true` if `doid` is on the known parent chain of some other
    /// object the client is interested in.
    pub fn is_ancestor_of_interest(&self, doid: Doid) -> bool {
        self.interests
            .iter()
            .filter(|&&interest| interest != doid)
            .any(|&interest| {
                let mut cursor = self.objects.get(&interest).map(|p| p.parent);
                // a parent cycle can't be longer than the cache
                for _ in 0..self.objects.len() {
                    match cursor {
                        Some(parent) if parent == doid => return true,
                        Some(parent) if !parent.is_none() => {
                            cursor = self.objects.get(&parent).map(|p| p.parent);
                        }
                        _ => break,
                    }
                }
                false
            })
    }

    // -- objects ---------------------------------------------------------

    /// Records an object. Returns `true` if it was not known yet.
    pub fn remember_object(&mut self, pointer: ObjectPointer) -> bool {
        self.objects.insert(pointer.doid, pointer).is_none()
    }

    pub fn forget_object(&mut self, doid: Doid) -> Option<ObjectPointer> {
        self.objects.remove(&doid)
    }

    pub fn object(&self, doid: Doid) -> Option<&ObjectPointer> {
        self.objects.get(&doid)
    }

    pub fn object_mut(&mut self, doid: Doid) -> Option<&mut ObjectPointer> {
        self.objects.get_mut(&doid)
    }

    pub fn knows(&self, doid: Doid) -> bool {
        self.objects.contains_key(&doid)
    }

    pub fn known_objects(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if this session owns `doid`.
    pub fn owns(&self, doid: Doid) -> bool {
        self.objects
            .get(&doid)
            .is_some_and(|p| p.owner == self.channel)
    }

    // -- echo suppression ------------------------------------------------

    /// Allocates a non-zero correlation id and remembers it.
    pub fn next_correlation(&mut self) -> u32 {
        let id = rand::rng().random_range(1..=u32::MAX);
        self.remember_correlation(id);
        id
    }

    /// Remembers a correlation id so its echo can be recognised.
    pub fn remember_correlation(&mut self, id: u32) {
        if id == 0 {
            return;
        }
        self.expire_correlations(Instant::now());
        if self.pending.len() >= self.config.max_pending_correlations {
            self.pending.pop_front();
        }
        self.pending.push_back((id, Instant::now()));
    }

    /// Returns `true` (and forgets the id) if `id` was issued by this
    /// session within the echo window.
    pub fn take_correlation(&mut self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        self.expire_correlations(Instant::now());
        match self.pending.iter().position(|(c, _)| *c == id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drops correlation ids older than the echo window.
    pub fn expire_correlations(&mut self, now: Instant) {
        let window = self.config.echo_window();
        while let Some((_, at)) = self.pending.front() {
            if now.saturating_duration_since(*at) <= window {
                break;
            }
            self.pending.pop_front();
        }
    }

    pub fn pending_correlations(&self) -> usize {
        self.pending.len()
    }

    // -- services --------------------------------------------------------

    pub fn discover_service(&mut self, service: DiscoveredService) {
        self.services.insert(service.name.clone(), service);
    }

    pub fn service(&self, name: &str) -> Option<&DiscoveredService> {
        self.services.get(name)
    }

    pub fn close_service(&mut self, name: &str) -> Option<DiscoveredService> {
        self.services.remove(name)
    }

    /// The discovered service listening on `channel`, if any.
    pub fn service_on(&self, channel: Channel) -> Option<&DiscoveredService> {
        self.services.values().find(|s| s.channel == channel)
    }

    // -- disconnect ------------------------------------------------------

    /// Queues an encoded message to send when the client goes away.
    pub fn queue_post_remove(&mut self, frame: Vec<u8>) {
        self.post_remove.push(frame);
    }

    pub fn clear_post_remove(&mut self) {
        self.post_remove.clear();
    }

    pub fn take_post_remove(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.post_remove)
    }

    /// Forgets interests, objects, correlations, and services. Queued
    /// post-remove messages are kept for the caller to send.
    pub fn clear(&mut self) {
        self.interests.clear();
        self.objects.clear();
        self.pending.clear();
        self.services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcmesh_protocol::client_channel;

    fn session() -> Session {
        Session::new(client_channel(1), SessionConfig::default())
    }

    #[test]
    fn test_new_session_starts_as_new_client() {
        let s = session();
        assert_eq!(s.state(), ClientState::NewClient);
        assert!(!s.is_authenticated());
    }

    #[test]
    fn test_transition_rejects_illegal_move() {
        let mut s = session();
        assert!(s.transition(ClientState::Authenticated).is_err());
        assert_eq!(s.state(), ClientState::NewClient);
    }

    #[test]
    fn test_owns_uses_session_channel() {
        let mut s = session();
        s.remember_object(ObjectPointer {
            doid: Doid(7),
            parent: Doid::NONE,
            owner: client_channel(1),
            type_id: 1,
        });
        s.remember_object(ObjectPointer {
            doid: Doid(8),
            parent: Doid(7),
            owner: Channel::NONE,
            type_id: 1,
        });
        assert!(s.owns(Doid(7)));
        assert!(!s.owns(Doid(8)));
        assert!(!s.owns(Doid(9)));
    }

    #[test]
    fn test_ancestor_of_interest_follows_known_parents() {
        let mut s = session();
        for (doid, parent) in [(7, 0), (8, 7), (9, 8), (20, 0)] {
            s.remember_object(ObjectPointer {
                doid: Doid(doid),
                parent: Doid(parent),
                owner: Channel::NONE,
                type_id: 1,
            });
        }
        s.add_interest(Doid(9));
        s.add_interest(Doid(7));
        s.add_interest(Doid(20));
        assert!(s.is_ancestor_of_interest(Doid(7)));
        assert!(s.is_ancestor_of_interest(Doid(8)));
        assert!(!s.is_ancestor_of_interest(Doid(9)));
        assert!(!s.is_ancestor_of_interest(Doid(20)));

        s.remove_interest(Doid(9));
        assert!(!s.is_ancestor_of_interest(Doid(7)));
    }

    #[test]
    fn test_ancestor_walk_survives_parent_cycle() {
        let mut s = session();
        for (doid, parent) in [(1, 2), (2, 1)] {
            s.remember_object(ObjectPointer {
                doid: Doid(doid),
                parent: Doid(parent),
                owner: Channel::NONE,
                type_id: 1,
            });
        }
        s.add_interest(Doid(1));
        assert!(!s.is_ancestor_of_interest(Doid(3)));
        assert!(s.is_ancestor_of_interest(Doid(2)));
    }

    #[test]
    fn test_correlation_is_taken_once() {
        let mut s = session();
        let id = s.next_correlation();
        assert_ne!(id, 0);
        assert!(s.take_correlation(id));
        assert!(!s.take_correlation(id));
        assert!(!s.take_correlation(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_correlation_expires_after_window() {
        let mut s = session();
        s.remember_correlation(55);
        tokio::time::advance(Duration::from_millis(2_001)).await;
        assert!(!s.take_correlation(55));
        assert_eq!(s.pending_correlations(), 0);
    }

    #[test]
    fn test_pending_correlations_bounded() {
        let mut s = Session::new(
            client_channel(1),
            SessionConfig {
                max_pending_correlations: 2,
                ..SessionConfig::default()
            },
        );
        s.remember_correlation(1);
        s.remember_correlation(2);
        s.remember_correlation(3);
        assert!(!s.take_correlation(1));
        assert!(s.take_correlation(3));
    }

    #[test]
    fn test_clear_keeps_post_remove() {
        let mut s = session();
        s.add_interest(Doid(4));
        s.queue_post_remove(vec![1, 2]);
        s.clear();
        assert_eq!(s.interests().count(), 0);
        assert_eq!(s.take_post_remove(), vec![vec![1, 2]]);
    }
}
