//! Static schema registry: type ids → field and method tables.
//!
//! Visibility is a bitmask fixed when the schema is built, so the
//! authority and the client agent answer "who may write this" and "who
//! hears about it" with a table lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ProtocolError;

/// An encoded field or argument value. The value codec is external; the
/// bus only moves the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValue(pub Vec<u8>);

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// MemberFlags
// ---------------------------------------------------------------------------

/// Visibility and persistence flags of a field or method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberFlags(u16);

impl MemberFlags {
    pub const NONE: Self = Self(0);
    /// Sent with every generate; always persisted.
    pub const REQUIRED: Self = Self(1 << 0);
    /// Kept in the authority's memory.
    pub const RAM: Self = Self(1 << 1);
    /// Persisted by a database backend.
    pub const DB: Self = Self(1 << 2);
    /// Everyone subscribed to the object channel hears about it.
    pub const BROADCAST: Self = Self(1 << 3);
    pub const OWNER_RECEIVE: Self = Self(1 << 4);
    pub const AI_RECEIVE: Self = Self(1 << 5);
    pub const CLIENT_RECEIVE: Self = Self(1 << 6);
    /// The object's owner may write/call it.
    pub const OWNER_SEND: Self = Self(1 << 7);
    /// Any authenticated client may write/call it.
    pub const CLIENT_SEND: Self = Self(1 << 8);

    /// Returns `true` if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the value survives in the authority.
    pub const fn is_persisted(self) -> bool {
        self.0 & (Self::REQUIRED.0 | Self::RAM.0 | Self::DB.0) != 0
    }

    /// Returns `true` if any receive flag is set.
    pub const fn has_receivers(self) -> bool {
        self.0
            & (Self::BROADCAST.0
                | Self::OWNER_RECEIVE.0
                | Self::AI_RECEIVE.0
                | Self::CLIENT_RECEIVE.0)
            != 0
    }

    /// Raw bits.
    pub const fn bits(self) -> u16 {
        self.0
    }
}

impl BitOr for MemberFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MemberFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A field of a distributed object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: u16,
    pub name: String,
    pub flags: MemberFlags,
    /// Seeded into generates that leave a required field out.
    pub default: FieldValue,
}

impl FieldDef {
    pub fn new(id: u16, name: &str, flags: MemberFlags) -> Self {
        Self {
            id,
            name: name.to_string(),
            flags,
            default: FieldValue::default(),
        }
    }

    /// Sets the default value.
    pub fn with_default(mut self, default: impl Into<FieldValue>) -> Self {
        self.default = default.into();
        self
    }
}

/// A method (RPC) of a distributed object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDef {
    pub id: u16,
    pub name: String,
    pub flags: MemberFlags,
}

impl MethodDef {
    pub fn new(id: u16, name: &str, flags: MemberFlags) -> Self {
        Self {
            id,
            name: name.to_string(),
            flags,
        }
    }
}

/// A distributed object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub id: u16,
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    pub fn new(id: u16, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    /// Looks up a field by id.
    pub fn find_field(&self, id: u16) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Looks up a method by id.
    pub fn find_method(&self, id: u16) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.id == id)
    }

    /// Fields flagged [`MemberFlags::REQUIRED`], in declaration order.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.flags.contains(MemberFlags::REQUIRED))
    }
}

impl fmt::Display for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable lookup table built once at process start.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<u16, TypeDef>,
    hash: u64,
}

/// Collects type definitions and validates them into a [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    types: Vec<TypeDef>,
}

impl SchemaRegistryBuilder {
    /// Adds a type.
    pub fn register(mut self, def: TypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Validates ids and computes the schema hash.
    ///
    /// # Errors
    /// [`ProtocolError::Schema`] on duplicate type, field, or method ids.
    pub fn build(self) -> Result<SchemaRegistry, ProtocolError> {
        let mut types = BTreeMap::new();
        for def in self.types {
            check_unique(def.fields.iter().map(|f| f.id), &def, "field")?;
            check_unique(def.methods.iter().map(|m| m.id), &def, "method")?;
            if types.contains_key(&def.id) {
                return Err(ProtocolError::Schema(format!(
                    "duplicate type id {}",
                    def.id
                )));
            }
            types.insert(def.id, def);
        }
        let hash = compute_hash(&types);
        Ok(SchemaRegistry { types, hash })
    }
}

impl SchemaRegistry {
    /// Starts a registry definition.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Looks up a type.
    pub fn get(&self, type_id: u16) -> Option<&TypeDef> {
        self.types.get(&type_id)
    }

    /// Looks up a field of a type.
    pub fn field(&self, type_id: u16, field_id: u16) -> Option<&FieldDef> {
        self.get(type_id)?.find_field(field_id)
    }

    /// Looks up a method of a type.
    pub fn method(&self, type_id: u16, method_id: u16) -> Option<&MethodDef> {
        self.get(type_id)?.find_method(method_id)
    }

    /// The hash clients must present at hello time.
    pub fn schema_hash(&self) -> u64 {
        self.hash
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn check_unique(
    ids: impl Iterator<Item = u16>,
    def: &TypeDef,
    what: &str,
) -> Result<(), ProtocolError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ProtocolError::Schema(format!(
                "duplicate {what} id {id} in {def}"
            )));
        }
    }
    Ok(())
}

/// sha256 over a canonical rendering of every definition, truncated to
/// the first eight bytes.
fn compute_hash(types: &BTreeMap<u16, TypeDef>) -> u64 {
    let mut hasher = Sha256::new();
    for def in types.values() {
        hasher.update(def.id.to_le_bytes());
        hasher.update(def.name.as_bytes());
        for f in &def.fields {
            hasher.update(b"f");
            hasher.update(f.id.to_le_bytes());
            hasher.update(f.name.as_bytes());
            hasher.update(f.flags.bits().to_le_bytes());
        }
        for m in &def.methods {
            hasher.update(b"m");
            hasher.update(m.id.to_le_bytes());
            hasher.update(m.name.as_bytes());
            hasher.update(m.flags.bits().to_le_bytes());
        }
    }
    let digest = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatar() -> TypeDef {
        TypeDef::new(1, "Avatar")
            .field(FieldDef::new(
                1,
                "name",
                MemberFlags::REQUIRED | MemberFlags::BROADCAST,
            ))
            .field(FieldDef::new(
                2,
                "hp",
                MemberFlags::RAM | MemberFlags::OWNER_RECEIVE | MemberFlags::AI_RECEIVE,
            ))
            .field(FieldDef::new(3, "scratch", MemberFlags::NONE))
            .method(MethodDef::new(1, "say", MemberFlags::CLIENT_SEND | MemberFlags::BROADCAST))
    }

    #[test]
    fn test_flags_contains_and_persisted() {
        let flags = MemberFlags::RAM | MemberFlags::OWNER_SEND;
        assert!(flags.contains(MemberFlags::RAM));
        assert!(!flags.contains(MemberFlags::BROADCAST));
        assert!(flags.is_persisted());
        assert!(!flags.has_receivers());
        assert!(!MemberFlags::BROADCAST.is_persisted());
        assert!(MemberFlags::BROADCAST.has_receivers());
    }

    #[test]
    fn test_registry_lookups() {
        let registry = SchemaRegistry::builder().register(avatar()).build().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.field(1, 2).unwrap().name, "hp");
        assert_eq!(registry.method(1, 1).unwrap().name, "say");
        assert!(registry.field(1, 9).is_none());
        assert!(registry.get(2).is_none());
        let required: Vec<_> = registry.get(1).unwrap().required_fields().map(|f| f.id).collect();
        assert_eq!(required, vec![1]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dup_type = SchemaRegistry::builder().register(avatar()).register(avatar()).build();
        assert!(matches!(dup_type, Err(ProtocolError::Schema(_))));

        let dup_field = SchemaRegistry::builder()
            .register(
                TypeDef::new(2, "Zone")
                    .field(FieldDef::new(1, "a", MemberFlags::RAM))
                    .field(FieldDef::new(1, "b", MemberFlags::RAM)),
            )
            .build();
        assert!(dup_field.is_err());
    }

    #[test]
    fn test_schema_hash_is_stable_and_sensitive() {
        let a = SchemaRegistry::builder().register(avatar()).build().unwrap();
        let b = SchemaRegistry::builder().register(avatar()).build().unwrap();
        assert_eq!(a.schema_hash(), b.schema_hash());

        let changed = SchemaRegistry::builder()
            .register(avatar().field(FieldDef::new(9, "extra", MemberFlags::RAM)))
            .build()
            .unwrap();
        assert_ne!(a.schema_hash(), changed.schema_hash());
    }
}
