//! The object table: every operation of the authority, without the bus.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arcmesh_protocol::{
    Channel, ChannelClass, Doid, FieldValue, MemberFlags, ObjectSnapshot, SchemaRegistry,
    StateFailure, TypeDef, is_reserved,
};

use crate::object::{DistributedObject, GenerateRequest, broadcast_targets};

/// A stored field update and the channels it must be broadcast to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub field: u16,
    pub value: FieldValue,
    pub targets: Vec<Channel>,
}

/// Objects by doid, their parent/child links, and the doid counter.
#[derive(Debug)]
pub struct ObjectTable {
    schema: Arc<SchemaRegistry>,
    objects: HashMap<Doid, DistributedObject>,
    first_doid: u32,
    next_doid: u32,
}

impl ObjectTable {
    pub fn new(schema: Arc<SchemaRegistry>, first_doid: u32) -> Self {
        let first_doid = first_doid.max(1);
        Self {
            schema,
            objects: HashMap::new(),
            first_doid,
            next_doid: first_doid,
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn get(&self, doid: Doid) -> Option<&DistributedObject> {
        self.objects.get(&doid)
    }

    pub fn contains(&self, doid: Doid) -> bool {
        self.objects.contains_key(&doid)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn doids(&self) -> impl Iterator<Item = Doid> + '_ {
        self.objects.keys().copied()
    }

    /// Next unused doid. Counts up from the configured first doid and
    /// wraps, skipping ids in use.
    pub fn dispense(&mut self) -> Doid {
        loop {
            let doid = Doid(self.next_doid);
            self.next_doid = self.next_doid.checked_add(1).unwrap_or(self.first_doid);
            if !self.objects.contains_key(&doid) {
                return doid;
            }
        }
    }

    fn object(&self, doid: Doid) -> Result<&DistributedObject, StateFailure> {
        self.objects.get(&doid).ok_or(StateFailure::MissingObject(doid))
    }

    fn type_of(&self, object: &DistributedObject) -> Result<&TypeDef, StateFailure> {
        self.schema
            .get(object.type_id)
            .ok_or(StateFailure::UnknownType(object.type_id))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Creates an object. Required fields left out of `request` are seeded
    /// from their schema defaults; values for fields that are not stored
    /// are ignored.
    pub fn generate(&mut self, request: GenerateRequest) -> Result<Doid, StateFailure> {
        let def = self
            .schema
            .get(request.type_id)
            .ok_or(StateFailure::UnknownType(request.type_id))?;

        let mut fields = BTreeMap::new();
        for (id, value) in request.fields {
            let field = def.find_field(id).ok_or(StateFailure::UnknownField {
                type_id: def.id,
                field: id,
            })?;
            if field.flags.is_persisted() {
                fields.insert(id, value);
            }
        }
        for field in def.required_fields() {
            fields
                .entry(field.id)
                .or_insert_with(|| field.default.clone());
        }

        // Owners are client channels or ordinary participants, never
        // infrastructure such as the authority's own inbox.
        let owner = request.owner;
        if !owner.is_none() && is_reserved(owner) && owner.class() != ChannelClass::Client {
            return Err(StateFailure::ReservedChannel(owner));
        }
        if !request.doid.is_none() && self.objects.contains_key(&request.doid) {
            return Err(StateFailure::DoidInUse(request.doid));
        }
        if !request.parent.is_none()
            && (request.parent == request.doid || !self.objects.contains_key(&request.parent))
        {
            return Err(StateFailure::InvalidParent(request.parent));
        }

        let doid = if request.doid.is_none() {
            self.dispense()
        } else {
            request.doid
        };
        let mut object =
            DistributedObject::new(doid, request.type_id, request.parent, request.owner);
        object.fields = fields;
        if let Some(parent) = self.objects.get_mut(&request.parent) {
            parent.children.insert(doid);
        }
        self.objects.insert(doid, object);
        tracing::debug!(
            %doid,
            type_id = request.type_id,
            parent = %request.parent,
            "object generated"
        );
        Ok(doid)
    }

    /// Removes `doid` and its whole subtree. Returns the removed doids,
    /// children before parents.
    pub fn destroy(&mut self, doid: Doid) -> Result<Vec<Doid>, StateFailure> {
        let parent = self.object(doid)?.parent;
        if let Some(p) = self.objects.get_mut(&parent) {
            p.children.remove(&doid);
        }

        let mut removed = Vec::new();
        let mut seen = HashSet::new();
        // (doid, children pushed)
        let mut stack = vec![(doid, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                if self.objects.remove(&current).is_some() {
                    removed.push(current);
                }
                continue;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.push((current, true));
            if let Some(object) = self.objects.get(&current) {
                for child in object.children.iter().rev() {
                    if !seen.contains(child) {
                        stack.push((*child, false));
                    }
                }
            }
        }
        tracing::debug!(%doid, removed = removed.len(), "object destroyed");
        Ok(removed)
    }

    /// Moves `doid` under `parent`. Returns the old parent.
    pub fn set_parent(&mut self, doid: Doid, parent: Doid) -> Result<Doid, StateFailure> {
        let old = self.object(doid)?.parent;
        if !parent.is_none()
            && (!self.objects.contains_key(&parent) || self.is_in_subtree(parent, doid))
        {
            return Err(StateFailure::InvalidParent(parent));
        }
        if old == parent {
            return Ok(old);
        }
        if let Some(p) = self.objects.get_mut(&old) {
            p.children.remove(&doid);
        }
        if let Some(p) = self.objects.get_mut(&parent) {
            p.children.insert(doid);
        }
        if let Some(o) = self.objects.get_mut(&doid) {
            o.parent = parent;
        }
        Ok(old)
    }

    /// Is `candidate` `root` or one of its descendants?
    fn is_in_subtree(&self, candidate: Doid, root: Doid) -> bool {
        let mut seen = HashSet::new();
        let mut current = candidate;
        while !current.is_none() && seen.insert(current) {
            if current == root {
                return true;
            }
            match self.objects.get(&current) {
                Some(o) => current = o.parent,
                None => break,
            }
        }
        false
    }

    pub fn discover_children(&self, doid: Doid) -> Result<Vec<Doid>, StateFailure> {
        Ok(self.object(doid)?.children.iter().copied().collect())
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Header and required fields, in declaration order.
    pub fn get_required(&self, doid: Doid) -> Result<ObjectSnapshot, StateFailure> {
        let object = self.object(doid)?;
        let def = self.type_of(object)?;
        let fields = def
            .required_fields()
            .map(|f| {
                let value = object.fields.get(&f.id).unwrap_or(&f.default).clone();
                (f.id, value)
            })
            .collect();
        Ok(object.snapshot(fields))
    }

    /// Header and every stored field.
    pub fn get_all(&self, doid: Doid) -> Result<ObjectSnapshot, StateFailure> {
        let object = self.object(doid)?;
        let fields = object
            .fields
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect();
        Ok(object.snapshot(fields))
    }

    /// One stored field; a stored field never set reads as its default.
    pub fn get_field(&self, doid: Doid, field: u16) -> Result<FieldValue, StateFailure> {
        let object = self.object(doid)?;
        let def = self.type_of(object)?;
        let field_def = def.find_field(field).ok_or(StateFailure::UnknownField {
            type_id: def.id,
            field,
        })?;
        if !field_def.flags.is_persisted() {
            return Err(StateFailure::Other(format!("field {field} is not stored")));
        }
        Ok(object
            .fields
            .get(&field)
            .unwrap_or(&field_def.default)
            .clone())
    }

    /// Applies one update from `sender`.
    pub fn set_field(
        &mut self,
        doid: Doid,
        field: u16,
        value: FieldValue,
        sender: Channel,
    ) -> Result<FieldUpdate, StateFailure> {
        let mut updates = self.set_fields(doid, vec![(field, value)], sender)?;
        updates.pop().ok_or_else(|| StateFailure::Other("empty update".into()))
    }

    /// Applies several updates atomically: if any field is unknown,
    /// nothing is stored.
    pub fn set_fields(
        &mut self,
        doid: Doid,
        fields: Vec<(u16, FieldValue)>,
        sender: Channel,
    ) -> Result<Vec<FieldUpdate>, StateFailure> {
        let object = self.object(doid)?;
        let def = self.type_of(object)?;
        let mut flags: Vec<MemberFlags> = Vec::with_capacity(fields.len());
        for (id, _) in &fields {
            let field_def = def.find_field(*id).ok_or(StateFailure::UnknownField {
                type_id: def.id,
                field: *id,
            })?;
            flags.push(field_def.flags);
        }
        let owner = object.owner;

        let Some(object) = self.objects.get_mut(&doid) else {
            return Err(StateFailure::MissingObject(doid));
        };
        let updates = fields
            .into_iter()
            .zip(flags)
            .map(|((field, value), flags)| {
                if flags.is_persisted() {
                    object.fields.insert(field, value.clone());
                }
                FieldUpdate {
                    field,
                    value,
                    targets: broadcast_targets(flags, doid, owner, sender),
                }
            })
            .collect();
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcmesh_protocol::{FieldDef, STATE_SERVER_CHANNEL, client_channel, object_channel};

    const ZONE: u16 = 1;
    const AVATAR: u16 = 2;

    const NAME: u16 = 1;
    const HP: u16 = 2;
    const EMOTE: u16 = 3;

    fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder()
                .register(TypeDef::new(ZONE, "Zone"))
                .register(
                    TypeDef::new(AVATAR, "Avatar")
                        .field(
                            FieldDef::new(
                                NAME,
                                "name",
                                MemberFlags::REQUIRED | MemberFlags::BROADCAST,
                            )
                            .with_default(b"anon".to_vec()),
                        )
                        .field(FieldDef::new(
                            HP,
                            "hp",
                            MemberFlags::RAM | MemberFlags::OWNER_RECEIVE,
                        ))
                        .field(FieldDef::new(EMOTE, "emote", MemberFlags::CLIENT_RECEIVE)),
                )
                .build()
                .unwrap(),
        )
    }

    fn table() -> ObjectTable {
        ObjectTable::new(schema(), 1)
    }

    #[test]
    fn test_dispense_skips_ids_in_use() {
        let mut t = table();
        t.generate(GenerateRequest::new(ZONE).doid(Doid(1))).unwrap();
        assert_eq!(t.dispense(), Doid(2));
        assert_eq!(t.dispense(), Doid(3));
    }

    #[test]
    fn test_dispense_wraps_to_first() {
        let mut t = ObjectTable::new(schema(), 5);
        t.next_doid = u32::MAX;
        assert_eq!(t.dispense(), Doid(u32::MAX));
        assert_eq!(t.dispense(), Doid(5));
    }

    #[test]
    fn test_generate_seeds_required_defaults_and_ignores_unstored() {
        let mut t = table();
        let doid = t
            .generate(GenerateRequest::new(AVATAR).field(EMOTE, b"wave".to_vec()))
            .unwrap();
        let snap = t.get_all(doid).unwrap();
        assert_eq!(snap.fields, vec![(NAME, FieldValue::from(b"anon".to_vec()))]);
    }

    #[test]
    fn test_generate_rejects_bad_requests() {
        let mut t = table();
        assert_eq!(
            t.generate(GenerateRequest::new(99)),
            Err(StateFailure::UnknownType(99))
        );
        assert_eq!(
            t.generate(GenerateRequest::new(ZONE).parent(Doid(50))),
            Err(StateFailure::InvalidParent(Doid(50)))
        );
        assert_eq!(
            t.generate(GenerateRequest::new(ZONE).doid(Doid(7)).parent(Doid(7))),
            Err(StateFailure::InvalidParent(Doid(7)))
        );
        t.generate(GenerateRequest::new(ZONE).doid(Doid(7))).unwrap();
        assert_eq!(
            t.generate(GenerateRequest::new(ZONE).doid(Doid(7))),
            Err(StateFailure::DoidInUse(Doid(7)))
        );
    }

    #[test]
    fn test_generate_rejects_reserved_owner() {
        let mut t = table();
        for owner in [STATE_SERVER_CHANNEL, Channel(5), object_channel(Doid(3))] {
            assert_eq!(
                t.generate(GenerateRequest::new(ZONE).owner(owner)),
                Err(StateFailure::ReservedChannel(owner))
            );
        }
        assert!(t.is_empty());
        let doid = t
            .generate(GenerateRequest::new(ZONE).owner(client_channel(4)))
            .unwrap();
        assert_eq!(t.get(doid).unwrap().owner, client_channel(4));
    }

    #[test]
    fn test_destroy_cascades_children_first() {
        let mut t = table();
        let zone = t.generate(GenerateRequest::new(ZONE)).unwrap();
        let a = t.generate(GenerateRequest::new(ZONE).parent(zone)).unwrap();
        let b = t.generate(GenerateRequest::new(AVATAR).parent(a)).unwrap();

        let removed = t.destroy(zone).unwrap();
        assert_eq!(removed, vec![b, a, zone]);
        assert!(t.is_empty());
        assert_eq!(t.destroy(zone), Err(StateFailure::MissingObject(zone)));
    }

    #[test]
    fn test_destroy_subtree_detaches_from_parent() {
        let mut t = table();
        let zone = t.generate(GenerateRequest::new(ZONE)).unwrap();
        let child = t.generate(GenerateRequest::new(ZONE).parent(zone)).unwrap();
        t.destroy(child).unwrap();
        assert!(t.discover_children(zone).unwrap().is_empty());
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut t = table();
        let a = t.generate(GenerateRequest::new(ZONE)).unwrap();
        let b = t.generate(GenerateRequest::new(ZONE).parent(a)).unwrap();
        assert_eq!(t.set_parent(a, b), Err(StateFailure::InvalidParent(b)));
        assert_eq!(t.set_parent(a, a), Err(StateFailure::InvalidParent(a)));

        let c = t.generate(GenerateRequest::new(ZONE)).unwrap();
        assert_eq!(t.set_parent(b, c), Ok(a));
        assert_eq!(t.discover_children(c).unwrap(), vec![b]);
        assert!(t.discover_children(a).unwrap().is_empty());
    }

    #[test]
    fn test_set_fields_is_atomic() {
        let mut t = table();
        let doid = t.generate(GenerateRequest::new(AVATAR)).unwrap();
        let err = t
            .set_fields(
                doid,
                vec![(HP, b"9".to_vec().into()), (77, b"x".to_vec().into())],
                Channel::NONE,
            )
            .unwrap_err();
        assert_eq!(err, StateFailure::UnknownField { type_id: AVATAR, field: 77 });
        assert_eq!(t.get_field(doid, HP).unwrap(), FieldValue::default());
    }

    #[test]
    fn test_set_field_stores_and_targets() {
        let mut t = table();
        let owner = client_channel(3);
        let doid = t
            .generate(GenerateRequest::new(AVATAR).owner(owner))
            .unwrap();
        let update = t
            .set_field(doid, HP, b"10".to_vec().into(), Channel::NONE)
            .unwrap();
        assert_eq!(update.targets, vec![owner]);
        assert_eq!(t.get_field(doid, HP).unwrap(), FieldValue::from(b"10".to_vec()));
    }

    #[test]
    fn test_unstored_field_is_broadcast_but_not_readable() {
        let mut t = table();
        let doid = t.generate(GenerateRequest::new(AVATAR)).unwrap();
        let update = t
            .set_field(doid, EMOTE, b"wave".to_vec().into(), Channel::NONE)
            .unwrap();
        assert_eq!(update.targets.len(), 1);
        assert!(matches!(t.get_field(doid, EMOTE), Err(StateFailure::Other(_))));
    }

    #[test]
    fn test_get_required_returns_declared_order() {
        let mut t = table();
        let doid = t
            .generate(GenerateRequest::new(AVATAR).field(NAME, b"bob".to_vec()))
            .unwrap();
        let snap = t.get_required(doid).unwrap();
        assert_eq!(snap.type_id, AVATAR);
        assert_eq!(snap.field(NAME), Some(&FieldValue::from(b"bob".to_vec())));
        assert_eq!(snap.fields.len(), 1);
    }
}
