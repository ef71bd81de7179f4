//! Remote access to the object authority over the bus.

use std::sync::Arc;

use arcmesh_director::{RequestConfig, Router};
use arcmesh_protocol::{
    BusMessage, Channel, Doid, FieldValue, ObjectSnapshot, STATE_SERVER_CHANNEL,
};

use crate::{GenerateRequest, ObjectAuthority, StateServerError};

/// Issues authority requests through a router and waits for the replies.
///
/// Every request goes to [`STATE_SERVER_CHANNEL`], so requests about
/// objects that don't exist still get an answer.
#[derive(Debug, Clone)]
pub struct StateServerClient {
    router: Arc<Router>,
    config: RequestConfig,
}

impl StateServerClient {
    /// Uses [`RequestConfig::bus`] timing.
    pub fn new(router: Arc<Router>) -> Self {
        Self::with_config(router, RequestConfig::bus())
    }

    pub fn with_config(router: Arc<Router>, config: RequestConfig) -> Self {
        Self { router, config }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    async fn call(&self, request: BusMessage) -> Result<BusMessage, StateServerError> {
        let message = request.to_message(vec![STATE_SERVER_CHANNEL], Channel::NONE)?;
        let reply = self.router.request(message, &self.config).await?;
        Ok(BusMessage::from_message(&reply)?)
    }
}

fn unexpected(reply: &BusMessage) -> StateServerError {
    StateServerError::UnexpectedReply(Some(reply.code()))
}

impl ObjectAuthority for StateServerClient {
    async fn dispense_id(&self) -> Result<Doid, StateServerError> {
        match self.call(BusMessage::DispenseId).await? {
            BusMessage::DispenseIdResp { doid } => Ok(doid),
            other => Err(unexpected(&other)),
        }
    }

    async fn generate(&self, request: GenerateRequest) -> Result<Doid, StateServerError> {
        let GenerateRequest {
            doid,
            type_id,
            parent,
            owner,
            fields,
        } = request;
        let request = BusMessage::Generate {
            doid,
            type_id,
            parent,
            owner,
            fields,
        };
        match self.call(request).await? {
            BusMessage::GenerateResp { result } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn destroy(&self, doid: Doid) -> Result<Vec<Doid>, StateServerError> {
        match self.call(BusMessage::Destroy { doid }).await? {
            BusMessage::DestroyResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn get_required(&self, doid: Doid) -> Result<ObjectSnapshot, StateServerError> {
        match self.call(BusMessage::GetRequired { doid }).await? {
            BusMessage::GetRequiredResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn get_all(&self, doid: Doid) -> Result<ObjectSnapshot, StateServerError> {
        match self.call(BusMessage::GetAll { doid }).await? {
            BusMessage::GetAllResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn get_field(&self, doid: Doid, field: u16) -> Result<FieldValue, StateServerError> {
        match self.call(BusMessage::GetField { doid, field }).await? {
            BusMessage::GetFieldResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn set_field(
        &self,
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
    ) -> Result<(), StateServerError> {
        let request = BusMessage::SetField {
            doid,
            field,
            value,
            sender,
            correlation: 0,
        };
        match self.call(request).await? {
            BusMessage::SetFieldResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn set_fields(
        &self,
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
    ) -> Result<(), StateServerError> {
        let request = BusMessage::SetFields {
            doid,
            fields,
            sender,
            correlation: 0,
        };
        match self.call(request).await? {
            BusMessage::SetFieldsResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn discover_children(&self, doid: Doid) -> Result<Vec<Doid>, StateServerError> {
        match self.call(BusMessage::DiscoverChildren { doid }).await? {
            BusMessage::DiscoverChildrenResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }

    async fn set_parent(&self, doid: Doid, parent: Doid) -> Result<(), StateServerError> {
        match self.call(BusMessage::SetParent { doid, parent }).await? {
            BusMessage::SetParentResp { result, .. } => Ok(result?),
            other => Err(unexpected(&other)),
        }
    }
}
