//! Distributed objects and where their updates go.

use std::collections::{BTreeMap, BTreeSet};

use arcmesh_protocol::{
    Channel, Doid, FieldValue, MemberFlags, ObjectSnapshot, ai_channel, client_mirror_channel,
    object_channel,
};

/// One object held by the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedObject {
    pub doid: Doid,
    pub type_id: u16,
    /// Channel of the owning client, or [`Channel::NONE`].
    pub owner: Channel,
    /// [`Doid::NONE`] for top-level objects.
    pub parent: Doid,
    /// Stored (persisted) field values by field id.
    pub fields: BTreeMap<u16, FieldValue>,
    pub children: BTreeSet<Doid>,
}

impl DistributedObject {
    pub fn new(doid: Doid, type_id: u16, parent: Doid, owner: Channel) -> Self {
        Self {
            doid,
            type_id,
            owner,
            parent,
            fields: BTreeMap::new(),
            children: BTreeSet::new(),
        }
    }

    /// Header plus the given field values.
    pub fn snapshot(&self, fields: Vec<(u16, FieldValue)>) -> ObjectSnapshot {
        ObjectSnapshot {
            doid: self.doid,
            type_id: self.type_id,
            parent: self.parent,
            owner: self.owner,
            fields,
        }
    }
}

/// Channels an update of a member with `flags` is broadcast to.
///
/// `BROADCAST` reaches everyone on the object channel and overrides the
/// targeted flags. Otherwise each receive flag adds its audience; the
/// owner is skipped when it is the sender. No receive flags, no echo.
pub fn broadcast_targets(
    flags: MemberFlags,
    doid: Doid,
    owner: Channel,
    sender: Channel,
) -> Vec<Channel> {
    if flags.contains(MemberFlags::BROADCAST) {
        return vec![object_channel(doid)];
    }
    let mut targets = Vec::with_capacity(3);
    if flags.contains(MemberFlags::OWNER_RECEIVE) && !owner.is_none() && owner != sender {
        targets.push(owner);
    }
    if flags.contains(MemberFlags::AI_RECEIVE) {
        targets.push(ai_channel(doid));
    }
    if flags.contains(MemberFlags::CLIENT_RECEIVE) {
        targets.push(client_mirror_channel(doid));
    }
    targets
}

/// Arguments of a generate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateRequest {
    /// [`Doid::NONE`] lets the authority pick one.
    pub doid: Doid,
    pub type_id: u16,
    pub parent: Doid,
    pub owner: Channel,
    pub fields: Vec<(u16, FieldValue)>,
}

impl GenerateRequest {
    pub fn new(type_id: u16) -> Self {
        Self {
            type_id,
            ..Self::default()
        }
    }

    pub fn doid(mut self, doid: Doid) -> Self {
        self.doid = doid;
        self
    }

    pub fn parent(mut self, parent: Doid) -> Self {
        self.parent = parent;
        self
    }

    pub fn owner(mut self, owner: Channel) -> Self {
        self.owner = owner;
        self
    }

    pub fn field(mut self, id: u16, value: impl Into<FieldValue>) -> Self {
        self.fields.push((id, value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcmesh_protocol::client_channel;

    const DOID: Doid = Doid(42);

    #[test]
    fn test_broadcast_flag_targets_object_channel_only() {
        let flags = MemberFlags::BROADCAST | MemberFlags::OWNER_RECEIVE | MemberFlags::AI_RECEIVE;
        let targets = broadcast_targets(flags, DOID, client_channel(1), Channel::NONE);
        assert_eq!(targets, vec![object_channel(DOID)]);
    }

    #[test]
    fn test_owner_and_ai_receive() {
        let flags = MemberFlags::OWNER_RECEIVE | MemberFlags::AI_RECEIVE;
        let targets = broadcast_targets(flags, DOID, client_channel(1), client_channel(2));
        assert_eq!(targets, vec![client_channel(1), ai_channel(DOID)]);
    }

    #[test]
    fn test_owner_not_echoed_own_update() {
        let targets = broadcast_targets(
            MemberFlags::OWNER_RECEIVE,
            DOID,
            client_channel(1),
            client_channel(1),
        );
        assert!(targets.is_empty());
    }

    #[test]
    fn test_unowned_object_skips_owner_receive() {
        let flags = MemberFlags::OWNER_RECEIVE | MemberFlags::CLIENT_RECEIVE;
        let targets = broadcast_targets(flags, DOID, Channel::NONE, Channel::NONE);
        assert_eq!(targets, vec![client_mirror_channel(DOID)]);
    }

    #[test]
    fn test_no_receive_flags_no_echo() {
        let flags = MemberFlags::REQUIRED | MemberFlags::RAM | MemberFlags::CLIENT_SEND;
        assert!(broadcast_targets(flags, DOID, client_channel(1), Channel::NONE).is_empty());
    }
}
