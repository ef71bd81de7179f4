//! Per-consumer message routing on top of a leaf director.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arcmesh_protocol::{Channel, Message};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::interest::InterestTable;
use crate::{Director, DirectorError};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A message handler. Runs synchronously on the pumping task with no
/// router or director lock held.
pub type Handler = Arc<dyn Fn(&Message) -> Result<(), HandlerError> + Send + Sync>;

/// Identifier of a registered route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// A handler that returned an error or panicked.
#[derive(Debug, Clone)]
pub struct HandlerFault {
    /// `None` for the default handler.
    pub route: Option<RouteId>,
    pub channels: Vec<Channel>,
    pub msg_type: Option<u16>,
    pub error: String,
}

struct Route {
    id: RouteId,
    channels: Vec<Channel>,
    handler: Handler,
}

#[derive(Default)]
struct RouterState {
    routes: Vec<Route>,
    counts: InterestTable,
    default: Option<Handler>,
    next_id: u64,
}

/// Binds handlers to channels on a leaf director.
///
/// Interest is reference counted per channel: the leaf subscribes when
/// the first route on a channel is registered and unsubscribes when the
/// last one is destroyed.
pub struct Router {
    leaf: Director,
    state: Mutex<RouterState>,
    faults: broadcast::Sender<HandlerFault>,
}

impl Router {
    /// Creates a router owning `leaf`.
    pub fn new(leaf: Director) -> Self {
        let (faults, _) = broadcast::channel(64);
        Self {
            leaf,
            state: Mutex::new(RouterState::default()),
            faults,
        }
    }

    /// The leaf this router consumes.
    pub fn director(&self) -> &Director {
        &self.leaf
    }

    /// Registers `handler` for `channels`. Duplicate channels in one call
    /// count once.
    pub fn register_route<F>(
        &self,
        handler: F,
        channels: impl IntoIterator<Item = Channel>,
    ) -> RouteId
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let mut channels: Vec<Channel> = channels.into_iter().collect();
        channels.sort();
        channels.dedup();

        // The leaf is updated under the router lock so concurrent
        // register/destroy calls reach it in the same order as the counts.
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = RouteId(state.next_id);
        let rising: Vec<Channel> = channels
            .iter()
            .copied()
            .filter(|ch| state.counts.add(*ch))
            .collect();
        self.leaf.add_interest_multiple(&rising);
        state.routes.push(Route {
            id,
            channels,
            handler: Arc::new(handler),
        });
        tracing::trace!(route = %id, subscribed = rising.len(), "route registered");
        id
    }

    /// Removes every route matching `predicate`. Returns how many were
    /// removed.
    pub fn destroy_route<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(RouteId, &[Channel]) -> bool,
    {
        let mut state = self.state.lock();
        let (gone, kept): (Vec<Route>, Vec<Route>) = std::mem::take(&mut state.routes)
            .into_iter()
            .partition(|r| predicate(r.id, &r.channels));
        state.routes = kept;

        let mut falling = Vec::new();
        for route in &gone {
            for ch in &route.channels {
                if state.counts.remove(*ch) {
                    falling.push(*ch);
                }
            }
        }
        self.leaf.remove_interest_multiple(&falling);
        if !gone.is_empty() {
            tracing::trace!(removed = gone.len(), unsubscribed = falling.len(), "routes destroyed");
        }
        gone.len()
    }

    /// Removes one route. Returns `false` if it did not exist.
    pub fn destroy_route_id(&self, id: RouteId) -> bool {
        self.destroy_route(|route, _| route == id) == 1
    }

    /// Removes every route.
    pub fn destroy_all_routes(&self) -> usize {
        self.destroy_route(|_, _| true)
    }

    /// Handler for messages no route matches.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.state.lock().default = Some(Arc::new(handler));
    }

    /// Removes the default handler; unrouted messages drop their
    /// spurious interest again.
    pub fn clear_default_handler(&self) {
        self.state.lock().default = None;
    }

    /// Number of live routes.
    pub fn route_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    /// Number of routes currently holding `channel`.
    pub fn route_refs(&self, channel: Channel) -> u32 {
        self.state.lock().counts.count(channel)
    }

    /// Receives every handler fault from now on.
    pub fn subscribe_faults(&self) -> broadcast::Receiver<HandlerFault> {
        self.faults.subscribe()
    }

    /// Queues a message on the leaf.
    ///
    /// # Errors
    /// See [`Director::send`].
    pub fn send(&self, message: Message) -> Result<(), DirectorError> {
        self.leaf.send(message)
    }

    /// Pumps the leaf and dispatches everything it delivered. Returns the
    /// number of messages dispatched.
    pub fn pump(&self) -> usize {
        self.leaf.pump();
        let delivered = self.leaf.take_delivered();
        let count = delivered.len();
        for message in delivered {
            self.dispatch(&message);
        }
        count
    }

    fn dispatch(&self, message: &Message) {
        let handlers: Vec<(Option<RouteId>, Handler)> = {
            let state = self.state.lock();
            let matched: Vec<(Option<RouteId>, Handler)> = state
                .routes
                .iter()
                .filter(|r| message.targets_any(|ch| r.channels.binary_search(&ch).is_ok()))
                .map(|r| (Some(r.id), Arc::clone(&r.handler)))
                .collect();
            if !matched.is_empty() {
                matched
            } else if let Some(default) = &state.default {
                vec![(None, Arc::clone(default))]
            } else {
                for ch in &message.channels {
                    if !state.counts.contains(*ch) && self.leaf.has_interest(*ch) {
                        tracing::debug!(channel = %ch, "dropping spurious interest");
                        self.leaf.drop_interest(*ch);
                    }
                }
                Vec::new()
            }
        };

        for (route, handler) in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (*handler)(message)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(&panic),
            };
            tracing::warn!(
                route = ?route,
                msg_type = ?message.msg_type(),
                error = %error,
                "handler failed"
            );
            let _ = self.faults.send(HandlerFault {
                route,
                channels: message.channels.clone(),
                msg_type: message.msg_type(),
                error,
            });
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("leaf", &self.leaf.id())
            .field("routes", &self.route_count())
            .finish()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}
