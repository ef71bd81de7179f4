//! Plain handles on remote distributed objects.

use std::sync::Arc;

use arcmesh_director::{RequestConfig, Router};
use arcmesh_protocol::{BusMessage, Channel, Doid, FieldValue, object_channel};

use crate::ServiceError;

/// Sends field writes and method calls to one object's channel.
#[derive(Debug, Clone)]
pub struct ObjectStub {
    router: Arc<Router>,
    doid: Doid,
    type_id: u16,
    /// Reported as the `sender` of writes and calls.
    sender: Channel,
}

impl ObjectStub {
    pub fn new(router: Arc<Router>, doid: Doid, type_id: u16) -> Self {
        Self {
            router,
            doid,
            type_id,
            sender: Channel::NONE,
        }
    }

    /// Writes and calls will carry `sender`.
    pub fn with_sender(mut self, sender: Channel) -> Self {
        self.sender = sender;
        self
    }

    pub fn doid(&self) -> Doid {
        self.doid
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn channel(&self) -> Channel {
        object_channel(self.doid)
    }

    /// Fire-and-forget field write; the authority stores and broadcasts it.
    pub fn set_field(
        &self,
        field: u16,
        value: impl Into<FieldValue>,
    ) -> Result<(), ServiceError> {
        let message = BusMessage::SetField {
            doid: self.doid,
            field,
            value: value.into(),
            sender: self.sender,
            correlation: 0,
        }
        .to_message(vec![self.channel()], self.sender)?;
        self.router.send(message)?;
        Ok(())
    }

    /// Fire-and-forget method call.
    pub fn call(&self, method: u16, args: impl Into<FieldValue>) -> Result<(), ServiceError> {
        let message = self
            .rpc(method, args.into())
            .to_message(vec![self.channel()], self.sender)?;
        self.router.send(message)?;
        Ok(())
    }

    /// Calls `method` and waits for its result.
    ///
    /// # Errors
    /// - [`ServiceError::Request`] if nobody answered in time
    /// - [`ServiceError::CallFailed`] if the implementation failed
    pub async fn call_with_reply(
        &self,
        method: u16,
        args: impl Into<FieldValue>,
        config: &RequestConfig,
    ) -> Result<FieldValue, ServiceError> {
        let message = self
            .rpc(method, args.into())
            .to_message(vec![self.channel()], Channel::NONE)?;
        let reply = self.router.request(message, config).await?;
        match BusMessage::from_message(&reply)? {
            BusMessage::BroadcastRpcResp { result, .. } => {
                result.map_err(ServiceError::CallFailed)
            }
            other => Err(ServiceError::UnexpectedReply(Some(other.code()))),
        }
    }

    fn rpc(&self, method: u16, args: FieldValue) -> BusMessage {
        BusMessage::BroadcastRpc {
            doid: self.doid,
            method,
            args,
            sender: self.sender,
            correlation: 0,
        }
    }
}
