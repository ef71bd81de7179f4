//! The local object authority and its bus front end.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arcmesh_director::{HandlerError, RouteId, Router};
use arcmesh_protocol::{
    BusMessage, Channel, ChannelClass, Doid, FieldValue, Message, ObjectSnapshot,
    STATE_SERVER_CHANNEL, SchemaRegistry, StateFailure, ai_channel, client_mirror_channel,
    object_channel,
};
use parking_lot::Mutex;

use crate::table::{FieldUpdate, ObjectTable};
use crate::{GenerateRequest, ObjectAuthority, StateServerConfig, StateServerError};

/// Kind reported to `QueryChannel` probes.
pub const QUERY_KIND: &str = "stateserver";

struct Attachment {
    router: Arc<Router>,
    control: RouteId,
    objects: HashMap<Doid, RouteId>,
}

struct Inner {
    config: StateServerConfig,
    table: Mutex<ObjectTable>,
    bus: Mutex<Option<Attachment>>,
}

/// Holds every distributed object of the cluster.
///
/// Usable directly through [`ObjectAuthority`], and on the bus once
/// [`attach`](StateServer::attach)ed to a router: requests arrive on
/// [`STATE_SERVER_CHANNEL`] and on each object's channel, replies go back
/// to the request's `from`. Field updates, destroys, and moves are
/// published to the objects' mirror channels.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct StateServer {
    inner: Arc<Inner>,
}

impl StateServer {
    pub fn new(schema: Arc<SchemaRegistry>, config: StateServerConfig) -> Self {
        let table = ObjectTable::new(schema, config.first_doid);
        Self {
            inner: Arc::new(Inner {
                config,
                table: Mutex::new(table),
                bus: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &StateServerConfig {
        &self.inner.config
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, doid: Doid) -> bool {
        self.inner.table.lock().contains(doid)
    }

    // -----------------------------------------------------------------------
    // Bus attachment
    // -----------------------------------------------------------------------

    /// Starts serving the bus through `router`. Replaces any previous
    /// attachment.
    pub fn attach(&self, router: Arc<Router>) {
        self.detach();
        let weak = Arc::downgrade(&self.inner);
        let control =
            router.register_route(bus_handler(Weak::clone(&weak)), [STATE_SERVER_CHANNEL]);
        let doids: Vec<Doid> = self.inner.table.lock().doids().collect();
        let objects = doids
            .into_iter()
            .map(|doid| {
                let handler = bus_handler(Weak::clone(&weak));
                (doid, router.register_route(handler, [object_channel(doid)]))
            })
            .collect();
        tracing::info!(name = %self.inner.config.name, "state server attached");
        *self.inner.bus.lock() = Some(Attachment {
            router,
            control,
            objects,
        });
    }

    /// Stops serving the bus. Returns `false` if not attached.
    pub fn detach(&self) -> bool {
        let Some(attachment) = self.inner.bus.lock().take() else {
            return false;
        };
        attachment.router.destroy_route_id(attachment.control);
        for route in attachment.objects.into_values() {
            attachment.router.destroy_route_id(route);
        }
        true
    }

    pub fn is_attached(&self) -> bool {
        self.inner.bus.lock().is_some()
    }

    fn open_object(&self, doid: Doid) {
        let mut bus = self.inner.bus.lock();
        if let Some(attachment) = bus.as_mut() {
            let weak = Arc::downgrade(&self.inner);
            let route = attachment
                .router
                .register_route(bus_handler(weak), [object_channel(doid)]);
            attachment.objects.insert(doid, route);
        }
    }

    fn close_objects(&self, doids: &[Doid]) {
        let mut bus = self.inner.bus.lock();
        if let Some(attachment) = bus.as_mut() {
            for doid in doids {
                if let Some(route) = attachment.objects.remove(doid) {
                    attachment.router.destroy_route_id(route);
                }
            }
        }
    }

    fn publish(&self, message: BusMessage, channels: Vec<Channel>, from: Channel) {
        let router = match self.inner.bus.lock().as_ref() {
            Some(attachment) => Arc::clone(&attachment.router),
            None => return,
        };
        let sent = message
            .to_message(channels, from)
            .map_err(StateServerError::from)
            .and_then(|m| router.send(m).map_err(StateServerError::from));
        if let Err(e) = sent {
            tracing::warn!(msg_type = message.code(), error = %e, "publish failed");
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    fn apply_generate(&self, request: GenerateRequest) -> Result<Doid, StateFailure> {
        let doid = self.inner.table.lock().generate(request)?;
        self.open_object(doid);
        Ok(doid)
    }

    fn apply_destroy(&self, doid: Doid) -> Result<Vec<Doid>, StateFailure> {
        let removed = self.inner.table.lock().destroy(doid)?;
        self.close_objects(&removed);
        for gone in &removed {
            self.publish(
                BusMessage::ObjectDestroyed { doid: *gone },
                vec![client_mirror_channel(*gone), ai_channel(*gone)],
                object_channel(*gone),
            );
        }
        Ok(removed)
    }

    fn apply_set_fields(
        &self,
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
        correlation: u32,
    ) -> Result<(), StateFailure> {
        let updates = self.inner.table.lock().set_fields(doid, fields, sender)?;
        for FieldUpdate {
            field,
            value,
            targets,
        } in updates
        {
            if targets.is_empty() {
                continue;
            }
            self.publish(
                BusMessage::BroadcastUpdate {
                    doid,
                    field,
                    value,
                    sender,
                    correlation,
                },
                targets,
                object_channel(doid),
            );
        }
        Ok(())
    }

    fn apply_set_parent(&self, doid: Doid, parent: Doid) -> Result<(), StateFailure> {
        let old_parent = self.inner.table.lock().set_parent(doid, parent)?;
        if old_parent != parent {
            self.publish(
                BusMessage::ObjectMoved {
                    doid,
                    old_parent,
                    new_parent: parent,
                },
                vec![client_mirror_channel(doid), ai_channel(doid)],
                object_channel(doid),
            );
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bus requests
    // -----------------------------------------------------------------------

    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let request = BusMessage::from_message(message)?;
        let from = message.from;
        let table = &self.inner.table;

        let reply = match request {
            BusMessage::QueryChannel => Some(BusMessage::QueryChannelResp {
                kind: QUERY_KIND.to_string(),
                name: self.inner.config.name.clone(),
            }),
            BusMessage::DispenseId => Some(BusMessage::DispenseIdResp {
                doid: table.lock().dispense(),
            }),
            BusMessage::Generate {
                doid,
                type_id,
                parent,
                owner,
                fields,
            } => {
                let result = self.apply_generate(GenerateRequest {
                    doid,
                    type_id,
                    parent,
                    owner,
                    fields,
                });
                write_reply(from, result.is_ok(), BusMessage::GenerateResp { result })
            }
            BusMessage::Destroy { doid } => {
                let result = self.apply_destroy(doid);
                write_reply(from, result.is_ok(), BusMessage::DestroyResp { doid, result })
            }
            BusMessage::GetRequired { doid } => Some(BusMessage::GetRequiredResp {
                doid,
                result: table.lock().get_required(doid),
            }),
            BusMessage::GetAll { doid } => Some(BusMessage::GetAllResp {
                doid,
                result: table.lock().get_all(doid),
            }),
            BusMessage::GetField { doid, field } => Some(BusMessage::GetFieldResp {
                doid,
                field,
                result: table.lock().get_field(doid, field),
            }),
            BusMessage::SetField {
                doid,
                field,
                value,
                sender,
                correlation,
            } => {
                let result = self.apply_set_fields(doid, vec![(field, value)], sender, correlation);
                write_reply(
                    from,
                    result.is_ok(),
                    BusMessage::SetFieldResp { doid, field, result },
                )
            }
            BusMessage::SetFields {
                doid,
                fields,
                sender,
                correlation,
            } => {
                let result = self.apply_set_fields(doid, fields, sender, correlation);
                write_reply(from, result.is_ok(), BusMessage::SetFieldsResp { doid, result })
            }
            BusMessage::DiscoverChildren { doid } => Some(BusMessage::DiscoverChildrenResp {
                doid,
                result: table.lock().discover_children(doid),
            }),
            BusMessage::SetParent { doid, parent } => {
                let result = self.apply_set_parent(doid, parent);
                write_reply(from, result.is_ok(), BusMessage::SetParentResp { doid, result })
            }
            other => {
                tracing::trace!(msg_type = other.code(), "not a state server request");
                None
            }
        };

        if let Some(reply) = reply {
            if from.is_none() {
                return Ok(());
            }
            if let Some(failure) = reply_failure(&reply) {
                tracing::debug!(%from, msg_type = reply.code(), %failure, "request refused");
            }
            self.publish(reply, vec![from], STATE_SERVER_CHANNEL);
        }
        Ok(())
    }
}

impl std::fmt::Debug for StateServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateServer")
            .field("name", &self.inner.config.name)
            .field("objects", &self.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn bus_handler(
    inner: Weak<Inner>,
) -> impl Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static {
    move |message| match inner.upgrade() {
        Some(inner) => StateServer { inner }.handle(message),
        None => Ok(()),
    }
}

/// Writes answer callback channels always; anyone else hears only about
/// failures.
fn write_reply(from: Channel, ok: bool, reply: BusMessage) -> Option<BusMessage> {
    let wanted = from.class() == ChannelClass::Callback || (!ok && !from.is_none());
    wanted.then_some(reply)
}

fn reply_failure(reply: &BusMessage) -> Option<&StateFailure> {
    match reply {
        BusMessage::GenerateResp { result: Err(e) }
        | BusMessage::GetRequiredResp { result: Err(e), .. }
        | BusMessage::GetAllResp { result: Err(e), .. }
        | BusMessage::GetFieldResp { result: Err(e), .. }
        | BusMessage::SetFieldResp { result: Err(e), .. }
        | BusMessage::SetFieldsResp { result: Err(e), .. }
        | BusMessage::DestroyResp { result: Err(e), .. }
        | BusMessage::DiscoverChildrenResp { result: Err(e), .. }
        | BusMessage::SetParentResp { result: Err(e), .. } => Some(e),
        _ => None,
    }
}

impl ObjectAuthority for StateServer {
    async fn dispense_id(&self) -> Result<Doid, StateServerError> {
        Ok(self.inner.table.lock().dispense())
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Doid, StateServerError> {
        Ok(self.apply_generate(request)?)
    }

    async fn destroy(&self, doid: Doid) -> Result<Vec<Doid>, StateServerError> {
        Ok(self.apply_destroy(doid)?)
    }

    async fn get_required(&self, doid: Doid) -> Result<ObjectSnapshot, StateServerError> {
        Ok(self.inner.table.lock().get_required(doid)?)
    }

    async fn get_all(&self, doid: Doid) -> Result<ObjectSnapshot, StateServerError> {
        Ok(self.inner.table.lock().get_all(doid)?)
    }

    async fn get_field(&self, doid: Doid, field: u16) -> Result<FieldValue, StateServerError> {
        Ok(self.inner.table.lock().get_field(doid, field)?)
    }

    async fn set_field(
        &self,
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
    ) -> Result<(), StateServerError> {
        Ok(self.apply_set_fields(doid, vec![(field, value)], sender, 0)?)
    }

    async fn set_fields(
        &self,
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
    ) -> Result<(), StateServerError> {
        Ok(self.apply_set_fields(doid, fields, sender, 0)?)
    }

    async fn discover_children(&self, doid: Doid) -> Result<Vec<Doid>, StateServerError> {
        Ok(self.inner.table.lock().discover_children(doid)?)
    }

    async fn set_parent(&self, doid: Doid, parent: Doid) -> Result<(), StateServerError> {
        Ok(self.apply_set_parent(doid, parent)?)
    }
}
