//! The object authority interface.

use std::future::Future;

use arcmesh_protocol::{Channel, Doid, FieldValue, ObjectSnapshot};

use crate::{GenerateRequest, StateServerError};

/// Operations on distributed objects.
///
/// [`StateServer`](crate::StateServer) answers them from its own table;
/// [`StateServerClient`](crate::StateServerClient) forwards them over the
/// bus. Callers written against this trait work with either.
pub trait ObjectAuthority: Send + Sync {
    /// Reserves a doid nothing is using.
    fn dispense_id(&self) -> impl Future<Output = Result<Doid, StateServerError>> + Send;

    /// Creates an object and returns its doid.
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> impl Future<Output = Result<Doid, StateServerError>> + Send;

    /// Destroys an object and its subtree. Returns every removed doid,
    /// children first.
    fn destroy(
        &self,
        doid: Doid,
    ) -> impl Future<Output = Result<Vec<Doid>, StateServerError>> + Send;

    fn get_required(
        &self,
        doid: Doid,
    ) -> impl Future<Output = Result<ObjectSnapshot, StateServerError>> + Send;

    fn get_all(
        &self,
        doid: Doid,
    ) -> impl Future<Output = Result<ObjectSnapshot, StateServerError>> + Send;

    fn get_field(
        &self,
        doid: Doid,
        field: u16,
    ) -> impl Future<Output = Result<FieldValue, StateServerError>> + Send;

    /// Stores one field and broadcasts it. `sender` is excluded from the
    /// owner echo.
    fn set_field(
        &self,
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
    ) -> impl Future<Output = Result<(), StateServerError>> + Send;

    /// Stores several fields atomically and broadcasts each.
    fn set_fields(
        &self,
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
    ) -> impl Future<Output = Result<(), StateServerError>> + Send;

    fn discover_children(
        &self,
        doid: Doid,
    ) -> impl Future<Output = Result<Vec<Doid>, StateServerError>> + Send;

    /// Moves an object under a new parent ([`Doid::NONE`] for top level).
    fn set_parent(
        &self,
        doid: Doid,
        parent: Doid,
    ) -> impl Future<Output = Result<(), StateServerError>> + Send;
}
