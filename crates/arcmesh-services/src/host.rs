//! Answers discovery and liveness probes for registered services.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arcmesh_director::{HandlerError, RequestConfig, RequestError, RouteId, Router};
use arcmesh_protocol::{BusMessage, Channel, Message, service_discovery_channel};
use parking_lot::Mutex;

use crate::{ServiceEntry, ServiceError, ServiceRegistry};

/// Kind reported to `QueryChannel` probes on a service channel.
pub const QUERY_KIND: &str = "service";

/// Publishes the services of a [`ServiceRegistry`] on the bus.
///
/// For every service the host listens on the name's discovery channel
/// and answers `DiscoverService` with the service channel, and on the
/// service channel itself to answer `QueryChannel`.
pub struct ServiceHost {
    router: Arc<Router>,
    registry: Arc<ServiceRegistry>,
    routes: Mutex<HashMap<String, RouteId>>,
}

impl ServiceHost {
    /// Serves every service currently in `registry`.
    pub fn attach(router: Arc<Router>, registry: Arc<ServiceRegistry>) -> Self {
        let host = Self {
            router,
            registry,
            routes: Mutex::new(HashMap::new()),
        };
        for entry in host.registry.entries() {
            host.serve(entry);
        }
        host
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Registers a new service and starts answering for it.
    ///
    /// # Errors
    /// [`ServiceError::AlreadyRegistered`] if the name is taken.
    pub fn publish(&self, entry: ServiceEntry) -> Result<(), ServiceError> {
        self.registry.register(entry.clone())?;
        self.serve(entry);
        Ok(())
    }

    /// Stops answering for `name` and drops it from the registry.
    pub fn withdraw(&self, name: &str) -> Option<ServiceEntry> {
        if let Some(route) = self.routes.lock().remove(name) {
            self.router.destroy_route_id(route);
        }
        self.registry.unregister(name)
    }

    fn serve(&self, entry: ServiceEntry) {
        let name = entry.name.clone();
        let discovery = service_discovery_channel(&entry.name);
        let channel = entry.channel;
        let router = Arc::downgrade(&self.router);
        let route = self.router.register_route(
            move |message| answer(&router, &entry, message),
            [discovery, channel],
        );
        if let Some(old) = self.routes.lock().insert(name, route) {
            self.router.destroy_route_id(old);
        }
    }
}

impl Drop for ServiceHost {
    fn drop(&mut self) {
        for route in self.routes.get_mut().drain().map(|(_, r)| r) {
            self.router.destroy_route_id(route);
        }
    }
}

fn answer(
    router: &Weak<Router>,
    entry: &ServiceEntry,
    message: &Message,
) -> Result<(), HandlerError> {
    let Some(router) = router.upgrade() else {
        return Ok(());
    };
    if message.from.is_none() {
        return Ok(());
    }
    let reply = match BusMessage::from_message(message) {
        Ok(BusMessage::DiscoverService { name }) if name == entry.name => {
            BusMessage::DiscoverServiceResp {
                name,
                channel: Some(entry.channel),
                anonymous: entry.anonymous,
            }
        }
        Ok(BusMessage::QueryChannel) if message.channels.contains(&entry.channel) => {
            BusMessage::QueryChannelResp {
                kind: QUERY_KIND.to_string(),
                name: entry.name.clone(),
            }
        }
        // Datagrams and calls on the service channel belong to the service.
        _ => return Ok(()),
    };
    router.send(reply.to_message(vec![message.from], entry.channel)?)?;
    Ok(())
}

/// Asks the cluster which channel serves `name`.
///
/// # Errors
/// - [`ServiceError::NotFound`] if nobody answered
/// - [`ServiceError::UnexpectedReply`] for a reply of the wrong type
pub async fn discover(
    router: &Router,
    name: &str,
    config: &RequestConfig,
) -> Result<ServiceEntry, ServiceError> {
    let request = BusMessage::DiscoverService {
        name: name.to_string(),
    }
    .to_message(vec![service_discovery_channel(name)], Channel::NONE)?;
    let reply = match router.request(request, config).await {
        Ok(reply) => reply,
        Err(RequestError::NoReply { .. }) => {
            return Err(ServiceError::NotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    match BusMessage::from_message(&reply)? {
        BusMessage::DiscoverServiceResp {
            name,
            channel: Some(channel),
            anonymous,
        } => Ok(ServiceEntry {
            name,
            channel,
            anonymous,
        }),
        BusMessage::DiscoverServiceResp { channel: None, .. } => {
            Err(ServiceError::NotFound(name.to_string()))
        }
        other => Err(ServiceError::UnexpectedReply(Some(other.code()))),
    }
}
