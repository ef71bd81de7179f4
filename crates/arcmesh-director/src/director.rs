//! The message director tree.
//!
//! Directors form a tree inside one process: a **root** at the top
//! (optionally linked to a remote director server), **nodes** that
//! aggregate their children's interest, and **leaves** that hand
//! messages to a consumer (a [`Router`](crate::Router) or a remote peer).
//!
//! ```text
//!                 root ── upstream link (optional)
//!               /      \
//!            node      leaf (state server router)
//!           /    \
//!        leaf    leaf   (one per client connection)
//! ```
//!
//! All directors of a tree live in one arena behind a single
//! `parking_lot::Mutex`. A [`Director`] is a cheap handle: the arena plus
//! a [`NodeId`]. No lock is held while consumers handle messages.
//!
//! # Propagation
//!
//! Each message processed by a director, tagged with where it came from:
//!
//! - is delivered locally if it targets a channel this director declared
//!   interest in, it was not sent by this director, and its structural
//!   hash is not in the recent history;
//! - goes to the parent (or the upstream link) unless it came from there;
//! - goes to every other child whose aggregate interest it targets.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use arcmesh_protocol::{
    BusMessage, CONTROL_CHANNEL, Channel, MAX_CHANNELS, MAX_FRAME_LEN, Message, ProtocolError,
    decode_batch, encode_batch,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::history::History;
use crate::interest::{InterestTable, expand_range};
use crate::{DirectorConfig, DirectorError};

/// Upper bound on sweeps a single [`Director::pump_tree`] makes.
const MAX_TREE_PASSES: usize = 16;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identifier of a director within its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dir-{}", self.0)
    }
}

/// Position of a director in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorKind {
    Root,
    Node,
    Leaf,
}

/// Where a message entered a director from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Sent by this director's own consumer.
    Local,
    Parent,
    Child(NodeId),
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkRole {
    /// A root's connection to the director server above it.
    Upstream,
    /// A remote process attached to this tree as a leaf.
    Peer,
}

/// Frame queues bridging a director to a connection task.
pub(crate) struct Link {
    role: LinkRole,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: Vec<Message>,
    closed: bool,
}

impl Link {
    pub(crate) fn new(
        role: LinkRole,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            role,
            inbound,
            outbound,
            pending: Vec::new(),
            closed: false,
        }
    }

    fn send_now(&mut self, messages: &[Message]) {
        if self.closed || messages.is_empty() {
            return;
        }
        match encode_batch(messages) {
            Ok(frame) => {
                if self.outbound.send(frame).is_err() {
                    debug!("link writer gone");
                    self.closed = true;
                }
            }
            Err(e) => warn!(error = %e, count = messages.len(), "dropping unencodable batch"),
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        self.send_now(&pending);
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

struct Node {
    kind: DirectorKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Interest this director declared itself.
    local: InterestTable,
    /// Sources (this director and each child) wanting each channel.
    aggregate: InterestTable,
    history: History,
    inbox: VecDeque<(Origin, Message)>,
    delivered: VecDeque<Message>,
    last_pump: Instant,
    link: Option<Link>,
    notify: Arc<Notify>,
}

impl Node {
    fn new(kind: DirectorKind, parent: Option<NodeId>, config: &DirectorConfig) -> Self {
        Self {
            kind,
            parent,
            children: Vec::new(),
            local: InterestTable::new(),
            aggregate: InterestTable::new(),
            history: History::new(config.history_capacity),
            inbox: VecDeque::new(),
            delivered: VecDeque::new(),
            last_pump: Instant::now(),
            link: None,
            notify: Arc::new(Notify::new()),
        }
    }

    fn upstream(&mut self) -> Option<&mut Link> {
        self.link
            .as_mut()
            .filter(|l| l.role == LinkRole::Upstream && !l.closed)
    }
}

struct TreeState {
    nodes: HashMap<NodeId, Node>,
    next_id: u32,
}

struct Tree {
    state: Mutex<TreeState>,
    config: DirectorConfig,
}

impl TreeState {
    fn insert(&mut self, node: Node) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, node);
        id
    }

    fn push_inbox(&mut self, id: NodeId, origin: Origin, message: Message) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.inbox.push_back((origin, message));
            node.notify.notify_one();
        }
    }

    // -- interest --------------------------------------------------------

    fn add_local(&mut self, id: NodeId, channels: &[Channel]) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let rising: Vec<Channel> = channels
            .iter()
            .copied()
            .filter(|ch| node.local.add(*ch))
            .collect();
        self.raise(id, rising);
    }

    fn remove_local(&mut self, id: NodeId, channels: &[Channel]) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        let falling: Vec<Channel> = channels
            .iter()
            .copied()
            .filter(|ch| node.local.remove(*ch))
            .collect();
        self.lower(id, falling);
    }

    fn purge_local(&mut self, id: NodeId, channel: Channel) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if node.local.purge(channel) {
            self.lower(id, vec![channel]);
        }
    }

    /// Adds one source for each channel at `id`, walking up while a
    /// channel goes from zero sources to one.
    fn raise(&mut self, id: NodeId, mut channels: Vec<Channel>) {
        let mut cursor = id;
        while !channels.is_empty() {
            let Some(node) = self.nodes.get_mut(&cursor) else {
                return;
            };
            channels.retain(|ch| node.aggregate.add(*ch));
            match node.parent {
                Some(parent) => cursor = parent,
                None => {
                    if let Some(link) = node.upstream() {
                        trace!(count = channels.len(), "subscribing upstream");
                        send_control(link, true, &channels);
                    }
                    return;
                }
            }
        }
    }

    /// Mirror of [`TreeState::raise`] for the one-to-zero edge.
    fn lower(&mut self, id: NodeId, mut channels: Vec<Channel>) {
        let mut cursor = id;
        while !channels.is_empty() {
            let Some(node) = self.nodes.get_mut(&cursor) else {
                return;
            };
            channels.retain(|ch| node.aggregate.remove(*ch));
            match node.parent {
                Some(parent) => cursor = parent,
                None => {
                    if let Some(link) = node.upstream() {
                        trace!(count = channels.len(), "unsubscribing upstream");
                        send_control(link, false, &channels);
                    }
                    return;
                }
            }
        }
    }

    /// Applies an interest control message received from a peer.
    fn apply_control(&mut self, id: NodeId, message: &Message, max_span: u64) {
        let control = match BusMessage::from_message(message) {
            Ok(control) if control.is_control() => control,
            Ok(other) => {
                warn!(node = %id, code = other.code(), "non-control message on control channel");
                return;
            }
            Err(e) => {
                warn!(node = %id, error = %e, "malformed control message dropped");
                return;
            }
        };
        match control {
            BusMessage::AddInterest { channel } => self.add_local(id, &[channel]),
            BusMessage::RemoveInterest { channel } => self.remove_local(id, &[channel]),
            BusMessage::AddInterestMultiple { channels } => self.add_local(id, &channels),
            BusMessage::RemoveInterestMultiple { channels } => self.remove_local(id, &channels),
            BusMessage::AddInterestRange { low, high } => match expand_range(low, high, max_span) {
                Ok(channels) => self.add_local(id, &channels),
                Err(e) => warn!(node = %id, error = %e, "rejected interest range"),
            },
            BusMessage::RemoveInterestRange { low, high } => {
                match expand_range(low, high, max_span) {
                    Ok(channels) => self.remove_local(id, &channels),
                    Err(e) => warn!(node = %id, error = %e, "rejected interest range"),
                }
            }
            _ => {}
        }
    }

    // -- topology ---------------------------------------------------------

    /// `id` and its descendants, parents before children.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                order.push(next);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    fn detach(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let parent = node.parent;
        let released: Vec<Channel> = node.aggregate.channels().collect();
        if let Some(parent) = parent {
            self.lower(parent, released);
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.retain(|c| *c != id);
            }
        }
        for gone in self.subtree(id) {
            if let Some(node) = self.nodes.remove(&gone) {
                // Wake anyone parked on this director so they notice.
                node.notify.notify_waiters();
            }
        }
    }

    // -- pumping ----------------------------------------------------------

    /// Drains one director: link frames, then its inbox. Returns the
    /// number of messages handled.
    fn pump_node(&mut self, id: NodeId, now: Instant, max_span: u64) -> usize {
        let mut handled = 0;

        let mut ingress = Vec::new();
        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(link) = node.link.as_mut() {
                drain_link(id, link, &mut ingress);
            }
        } else {
            return 0;
        }
        for (role, message) in ingress {
            handled += 1;
            match role {
                LinkRole::Upstream => self.push_inbox(id, Origin::Parent, message),
                LinkRole::Peer if message.channels.contains(&CONTROL_CHANNEL) => {
                    self.apply_control(id, &message, max_span);
                }
                LinkRole::Peer => self.push_inbox(id, Origin::Local, message),
            }
        }

        let mut delivered_any = false;
        loop {
            let next = self.nodes.get_mut(&id).and_then(|n| n.inbox.pop_front());
            let Some((origin, message)) = next else {
                break;
            };
            handled += 1;
            delivered_any |= self.route(id, origin, message);
        }

        if let Some(node) = self.nodes.get_mut(&id) {
            if let Some(link) = node.link.as_mut() {
                link.flush();
            }
            node.last_pump = now;
            if delivered_any && !node.delivered.is_empty() {
                node.notify.notify_one();
            }
        }
        handled
    }

    /// Applies the propagation rules to one message. Returns `true` if
    /// it was delivered to this director's consumer.
    fn route(&mut self, id: NodeId, origin: Origin, message: Message) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };

        let deliver = origin != Origin::Local
            && node.local.intersects(&message.channels)
            && node.history.insert(message.structural_hash());
        if deliver {
            match node.link.as_mut() {
                Some(link) if link.role == LinkRole::Peer => link.pending.push(message.clone()),
                _ => node.delivered.push_back(message.clone()),
            }
        }

        let upward = origin != Origin::Parent;
        let parent = if upward { node.parent } else { None };
        if upward && node.parent.is_none() {
            if let Some(link) = node.upstream() {
                link.pending.push(message.clone());
            }
        }
        let children = node.children.clone();

        if let Some(parent) = parent {
            self.push_inbox(parent, Origin::Child(id), message.clone());
        }
        for child in children {
            if origin == Origin::Child(child) {
                continue;
            }
            let wants = self
                .nodes
                .get(&child)
                .is_some_and(|c| c.aggregate.intersects(&message.channels));
            if wants {
                self.push_inbox(child, Origin::Parent, message.clone());
            }
        }
        deliver
    }
}

fn drain_link(id: NodeId, link: &mut Link, out: &mut Vec<(LinkRole, Message)>) {
    loop {
        match link.inbound.try_recv() {
            Ok(frame) => match decode_batch(&frame) {
                Ok(batch) => out.extend(batch.into_iter().map(|m| (link.role, m))),
                Err(e) => warn!(node = %id, error = %e, "malformed batch dropped"),
            },
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => {
                if !link.closed {
                    debug!(node = %id, "link closed");
                }
                link.closed = true;
                break;
            }
        }
    }
}

fn send_control(link: &mut Link, add: bool, channels: &[Channel]) {
    let control = match (add, channels) {
        (_, []) => return,
        (true, [channel]) => BusMessage::AddInterest { channel: *channel },
        (false, [channel]) => BusMessage::RemoveInterest { channel: *channel },
        (true, many) => BusMessage::AddInterestMultiple {
            channels: many.to_vec(),
        },
        (false, many) => BusMessage::RemoveInterestMultiple {
            channels: many.to_vec(),
        },
    };
    match control.to_message(vec![CONTROL_CHANNEL], Channel::NONE) {
        Ok(message) => link.send_now(&[message]),
        Err(e) => warn!(error = %e, "failed to encode interest control"),
    }
}

// ---------------------------------------------------------------------------
// Director handle
// ---------------------------------------------------------------------------

/// Handle to one director in a tree. Cloning it is cheap; all clones
/// address the same director.
#[derive(Clone)]
pub struct Director {
    tree: Arc<Tree>,
    id: NodeId,
}

impl fmt::Debug for Director {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Director")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .finish()
    }
}

impl Director {
    /// Creates a new tree and returns its root.
    pub fn root(config: DirectorConfig) -> Director {
        let mut state = TreeState {
            nodes: HashMap::new(),
            next_id: 0,
        };
        let id = state.insert(Node::new(DirectorKind::Root, None, &config));
        debug!(root = %id, "director tree created");
        Director {
            tree: Arc::new(Tree {
                state: Mutex::new(state),
                config,
            }),
            id,
        }
    }

    /// Adds an internal aggregator below this director.
    ///
    /// # Errors
    /// [`DirectorError::LeafHasNoChildren`] or [`DirectorError::Detached`].
    pub fn add_node(&self) -> Result<Director, DirectorError> {
        self.add_child(DirectorKind::Node)
    }

    /// Adds a consumer-facing leaf below this director.
    ///
    /// # Errors
    /// [`DirectorError::LeafHasNoChildren`] or [`DirectorError::Detached`].
    pub fn add_leaf(&self) -> Result<Director, DirectorError> {
        self.add_child(DirectorKind::Leaf)
    }

    fn add_child(&self, kind: DirectorKind) -> Result<Director, DirectorError> {
        let mut state = self.tree.state.lock();
        match state.nodes.get(&self.id).map(|n| n.kind) {
            None => return Err(DirectorError::Detached(self.id)),
            Some(DirectorKind::Leaf) => return Err(DirectorError::LeafHasNoChildren(self.id)),
            Some(_) => {}
        }
        let child = state.insert(Node::new(kind, Some(self.id), &self.tree.config));
        if let Some(parent) = state.nodes.get_mut(&self.id) {
            parent.children.push(child);
        }
        trace!(parent = %self.id, child = %child, ?kind, "director added");
        Ok(Director {
            tree: Arc::clone(&self.tree),
            id: child,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// `None` once the director has been detached.
    pub fn kind(&self) -> Option<DirectorKind> {
        self.tree.state.lock().nodes.get(&self.id).map(|n| n.kind)
    }

    pub fn is_attached(&self) -> bool {
        self.tree.state.lock().nodes.contains_key(&self.id)
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.tree.config
    }

    pub fn parent(&self) -> Option<Director> {
        let parent = self.tree.state.lock().nodes.get(&self.id)?.parent?;
        Some(Director {
            tree: Arc::clone(&self.tree),
            id: parent,
        })
    }

    // -- interest ----------------------------------------------------------

    /// Declares interest in `channel`. References are counted; the tree
    /// subscribes upstream on the first one only.
    pub fn add_interest(&self, channel: Channel) {
        self.tree.state.lock().add_local(self.id, &[channel]);
    }

    /// Releases one reference to `channel`.
    pub fn remove_interest(&self, channel: Channel) {
        self.tree.state.lock().remove_local(self.id, &[channel]);
    }

    pub fn add_interest_multiple(&self, channels: &[Channel]) {
        self.tree.state.lock().add_local(self.id, channels);
    }

    pub fn remove_interest_multiple(&self, channels: &[Channel]) {
        self.tree.state.lock().remove_local(self.id, channels);
    }

    /// Declares interest in every channel of `low..=high`.
    ///
    /// # Errors
    /// [`DirectorError::InvalidRange`] or [`DirectorError::RangeTooLarge`].
    pub fn add_interest_range(&self, low: Channel, high: Channel) -> Result<(), DirectorError> {
        let channels = expand_range(low, high, self.tree.config.max_range_span)?;
        self.add_interest_multiple(&channels);
        Ok(())
    }

    /// Releases one reference to every channel of `low..=high`.
    ///
    /// # Errors
    /// [`DirectorError::InvalidRange`] or [`DirectorError::RangeTooLarge`].
    pub fn remove_interest_range(&self, low: Channel, high: Channel) -> Result<(), DirectorError> {
        let channels = expand_range(low, high, self.tree.config.max_range_span)?;
        self.remove_interest_multiple(&channels);
        Ok(())
    }

    /// Drops `channel` regardless of how many references it has.
    pub fn drop_interest(&self, channel: Channel) {
        self.tree.state.lock().purge_local(self.id, channel);
    }

    /// Returns `true` if this director itself declared `channel`.
    pub fn has_interest(&self, channel: Channel) -> bool {
        self.tree
            .state
            .lock()
            .nodes
            .get(&self.id)
            .is_some_and(|n| n.local.contains(channel))
    }

    /// Number of sources (this director and its children) wanting `channel`.
    pub fn aggregate_sources(&self, channel: Channel) -> u32 {
        self.tree
            .state
            .lock()
            .nodes
            .get(&self.id)
            .map_or(0, |n| n.aggregate.count(channel))
    }

    /// Channels this director declared itself.
    pub fn local_interest(&self) -> Vec<Channel> {
        let state = self.tree.state.lock();
        let mut channels: Vec<Channel> = state
            .nodes
            .get(&self.id)
            .map(|n| n.local.channels().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    // -- messages ----------------------------------------------------------

    /// Queues a message for propagation on the next pump.
    ///
    /// # Errors
    /// - [`DirectorError::Protocol`] when the message can't be framed
    /// - [`DirectorError::Detached`] when this director left the tree
    pub fn send(&self, message: Message) -> Result<(), DirectorError> {
        if message.channels.len() > MAX_CHANNELS {
            return Err(ProtocolError::TooManyChannels(message.channels.len()).into());
        }
        if message.wire_len() > MAX_FRAME_LEN {
            return Err(ProtocolError::MessageTooLarge(message.wire_len()).into());
        }
        let mut state = self.tree.state.lock();
        if !state.nodes.contains_key(&self.id) {
            return Err(DirectorError::Detached(self.id));
        }
        state.push_inbox(self.id, Origin::Local, message);
        Ok(())
    }

    /// Drains this director. If the parent has not been pumped within
    /// [`DirectorConfig::stale_parent_after`], the stale ancestors are
    /// pumped too and the path back down is drained again.
    ///
    /// Never blocks on I/O. Returns the number of messages handled.
    pub fn pump(&self) -> usize {
        let max_span = self.tree.config.max_range_span;
        let stale_after = self.tree.config.stale_parent_after();
        let mut state = self.tree.state.lock();
        let now = Instant::now();

        let mut handled = state.pump_node(self.id, now, max_span);

        let mut path = Vec::new();
        let mut cursor = self.id;
        while let Some(parent) = state.nodes.get(&cursor).and_then(|n| n.parent) {
            let stale = state
                .nodes
                .get(&parent)
                .is_some_and(|p| now.saturating_duration_since(p.last_pump) > stale_after);
            if !stale {
                break;
            }
            path.push(parent);
            cursor = parent;
        }
        if path.is_empty() {
            return handled;
        }
        trace!(node = %self.id, depth = path.len(), "cascading pump to stale parent");
        for id in &path {
            handled += state.pump_node(*id, now, max_span);
        }
        // Back down: everything below the topmost stale ancestor, then us.
        for id in path.iter().rev().skip(1) {
            handled += state.pump_node(*id, now, max_span);
        }
        handled += state.pump_node(self.id, now, max_span);
        handled
    }

    /// Pumps every director in this subtree until nothing moves (bounded
    /// number of sweeps). This is what a root's pump loop calls.
    pub fn pump_tree(&self) -> usize {
        let max_span = self.tree.config.max_range_span;
        let mut state = self.tree.state.lock();
        let now = Instant::now();
        let order = state.subtree(self.id);
        let mut total = 0;
        for _ in 0..MAX_TREE_PASSES {
            let mut moved = 0;
            // Children first so upward traffic reaches the top, then
            // parents first so it comes back down.
            for id in order.iter().rev() {
                moved += state.pump_node(*id, now, max_span);
            }
            for id in &order {
                moved += state.pump_node(*id, now, max_span);
            }
            total += moved;
            if moved == 0 {
                break;
            }
        }
        total
    }

    /// Takes every message delivered to this director's consumer, in
    /// delivery order.
    pub fn take_delivered(&self) -> Vec<Message> {
        self.tree
            .state
            .lock()
            .nodes
            .get_mut(&self.id)
            .map(|n| n.delivered.drain(..).collect())
            .unwrap_or_default()
    }

    /// Notified when messages arrive in this director's inbox or are
    /// delivered to its consumer.
    pub fn notifier(&self) -> Arc<Notify> {
        self.tree
            .state
            .lock()
            .nodes
            .get(&self.id)
            .map(|n| Arc::clone(&n.notify))
            .unwrap_or_default()
    }

    /// Removes this director and its subtree, releasing all the interest
    /// they held. Undelivered messages are dropped.
    pub fn detach(&self) {
        self.tree.state.lock().detach(self.id);
        debug!(node = %self.id, "director detached");
    }

    // -- links -------------------------------------------------------------

    /// Attaches link queues. An upstream link is told about every channel
    /// the tree already wants.
    pub(crate) fn attach_link(
        &self,
        role: LinkRole,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        outbound: mpsc::UnboundedSender<Bytes>,
    ) -> Result<Arc<Notify>, DirectorError> {
        let mut state = self.tree.state.lock();
        let node = state
            .nodes
            .get_mut(&self.id)
            .ok_or(DirectorError::Detached(self.id))?;
        if role == LinkRole::Upstream && node.parent.is_some() {
            return Err(DirectorError::NotRoot(self.id));
        }
        let mut link = Link::new(role, inbound, outbound);
        if role == LinkRole::Upstream {
            let mut existing: Vec<Channel> = node.aggregate.channels().collect();
            existing.sort();
            send_control(&mut link, true, &existing);
        }
        node.link = Some(link);
        Ok(Arc::clone(&node.notify))
    }

    /// Returns `true` while an attached link's connection is open.
    pub fn link_open(&self) -> bool {
        self.tree
            .state
            .lock()
            .nodes
            .get(&self.id)
            .and_then(|n| n.link.as_ref())
            .is_some_and(|l| !l.closed)
    }
}
