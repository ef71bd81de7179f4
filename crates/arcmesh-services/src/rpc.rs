//! Explicit RPC dispatch: (type, method) → handler.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use arcmesh_director::{HandlerError, RouteId, Router};
use arcmesh_protocol::{
    BusMessage, Channel, ChannelClass, Doid, FieldValue, Message, ai_channel, object_channel,
};
use parking_lot::RwLock;

use crate::ServiceError;

/// One incoming call.
#[derive(Debug, Clone, Copy)]
pub struct RpcCall<'a> {
    pub doid: Doid,
    pub method: u16,
    pub args: &'a FieldValue,
    /// Who made the call (a client channel, or whatever the caller set).
    pub sender: Channel,
    pub correlation: u32,
}

/// Returns `Ok(Some(value))` to answer the caller, `Ok(None)` for
/// methods with no result, `Err` to report a failure back.
pub type RpcHandler =
    Arc<dyn Fn(&RpcCall<'_>) -> Result<Option<FieldValue>, String> + Send + Sync>;

/// Handlers for the methods of the object types a process implements.
#[derive(Default)]
pub struct RpcDispatcher {
    handlers: RwLock<HashMap<(u16, u16), RpcHandler>>,
}

impl RpcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `method` of `type_id`, replacing any previous one.
    pub fn register<F>(&self, type_id: u16, method: u16, handler: F) -> Option<RpcHandler>
    where
        F: Fn(&RpcCall<'_>) -> Result<Option<FieldValue>, String> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert((type_id, method), Arc::new(handler))
    }

    pub fn contains(&self, type_id: u16, method: u16) -> bool {
        self.handlers.read().contains_key(&(type_id, method))
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Runs the handler for `call` on an object of `type_id`.
    ///
    /// # Errors
    /// - [`ServiceError::UnknownMethod`] with no handler for the pair
    /// - [`ServiceError::CallFailed`] when the handler fails
    pub fn invoke(
        &self,
        type_id: u16,
        call: &RpcCall<'_>,
    ) -> Result<Option<FieldValue>, ServiceError> {
        let handler = self
            .handlers
            .read()
            .get(&(type_id, call.method))
            .cloned()
            .ok_or(ServiceError::UnknownMethod {
                type_id,
                method: call.method,
            })?;
        (*handler)(call).map_err(ServiceError::CallFailed)
    }

    /// Serves calls to object `doid` of `type_id` arriving on its object
    /// and AI channels. Answers go back only to callback channels; a caller
    /// waiting on a method with no result gets an empty value.
    pub fn serve_object(
        self: &Arc<Self>,
        router: &Router,
        doid: Doid,
        type_id: u16,
    ) -> RouteId {
        let dispatcher = Arc::downgrade(self);
        let reply_router = router.director().clone();
        router.register_route(
            move |message| {
                on_rpc(&dispatcher, type_id, message, |reply| {
                    reply_router.send(reply)?;
                    Ok(())
                })
            },
            [object_channel(doid), ai_channel(doid)],
        )
    }
}

impl std::fmt::Debug for RpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<(u16, u16)> = self.handlers.read().keys().copied().collect();
        keys.sort_unstable();
        f.debug_struct("RpcDispatcher").field("methods", &keys).finish()
    }
}

fn on_rpc(
    dispatcher: &Weak<RpcDispatcher>,
    type_id: u16,
    message: &Message,
    send: impl FnOnce(Message) -> Result<(), HandlerError>,
) -> Result<(), HandlerError> {
    let Some(dispatcher) = dispatcher.upgrade() else {
        return Ok(());
    };
    let BusMessage::BroadcastRpc {
        doid,
        method,
        args,
        sender,
        correlation,
    } = BusMessage::from_message(message)?
    else {
        // Field updates and other traffic on the object channels.
        return Ok(());
    };

    let call = RpcCall {
        doid,
        method,
        args: &args,
        sender,
        correlation,
    };
    let wants_reply = message.from.class() == ChannelClass::Callback;
    let (result, failure) = match dispatcher.invoke(type_id, &call) {
        Ok(None) if !wants_reply => return Ok(()),
        Ok(value) => (Ok(value.unwrap_or_default()), None),
        Err(e) => (Err(e.to_string()), Some(e)),
    };
    if wants_reply {
        let reply = BusMessage::BroadcastRpcResp {
            doid,
            method,
            result,
        }
        .to_message(vec![message.from], object_channel(doid))?;
        send(reply)?;
    }
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
