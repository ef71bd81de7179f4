//! Named services and the channels they listen on.

use std::collections::BTreeMap;

use arcmesh_protocol::{Channel, is_reserved, service_channel};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::ServiceError;

/// One service as seen by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub channel: Channel,
    /// Visible to clients that have not authenticated yet.
    #[serde(default)]
    pub anonymous: bool,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>, channel: Channel) -> Self {
        Self {
            name: name.into(),
            channel,
            anonymous: false,
        }
    }

    /// Marks the service as usable before authentication.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Services known to this process.
///
/// Created by the host and handed to whoever needs it; there is no
/// process-wide instance.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: RwLock<BTreeMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// - [`ServiceError::ReservedChannel`] if the channel is reserved
    /// - [`ServiceError::AlreadyRegistered`] if the name is taken
    pub fn register(&self, entry: ServiceEntry) -> Result<(), ServiceError> {
        if is_reserved(entry.channel) {
            return Err(ServiceError::ReservedChannel(entry.channel));
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.name) {
            return Err(ServiceError::AlreadyRegistered(entry.name));
        }
        tracing::info!(
            service = %entry.name,
            channel = %entry.channel,
            anonymous = entry.anonymous,
            "service registered"
        );
        entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Registers `name` on the service channel numbered `id`.
    pub fn register_numbered(
        &self,
        name: impl Into<String>,
        id: u32,
        anonymous: bool,
    ) -> Result<ServiceEntry, ServiceError> {
        let mut entry = ServiceEntry::new(name, service_channel(id));
        entry.anonymous = anonymous;
        self.register(entry.clone())?;
        Ok(entry)
    }

    pub fn unregister(&self, name: &str) -> Option<ServiceEntry> {
        self.entries.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<ServiceEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Reverse lookup by channel.
    pub fn by_channel(&self, channel: Channel) -> Option<ServiceEntry> {
        self.entries
            .read()
            .values()
            .find(|e| e.channel == channel)
            .cloned()
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> Vec<ServiceEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arcmesh_protocol::{RESERVED_LIMIT, STATE_SERVER_CHANNEL, client_channel};

    #[test]
    fn test_register_and_lookup() {
        let registry = ServiceRegistry::new();
        registry
            .register(ServiceEntry::new("auth", service_channel(1)).anonymous())
            .unwrap();
        let entry = registry.get("auth").unwrap();
        assert!(entry.anonymous);
        assert_eq!(registry.by_channel(service_channel(1)), Some(entry));
        assert!(registry.get("shop").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = ServiceRegistry::new();
        registry.register_numbered("shop", 2, false).unwrap();
        assert!(matches!(
            registry.register_numbered("shop", 3, false),
            Err(ServiceError::AlreadyRegistered(name)) if name == "shop"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reserved_channels_rejected() {
        let registry = ServiceRegistry::new();
        for channel in [STATE_SERVER_CHANNEL, Channel(42), client_channel(5)] {
            assert!(matches!(
                registry.register(ServiceEntry::new("sneaky", channel)),
                Err(ServiceError::ReservedChannel(ch)) if ch == channel
            ));
        }
        assert!(registry.is_empty());
        registry
            .register(ServiceEntry::new("fine", Channel(RESERVED_LIMIT)))
            .unwrap();
    }

    #[test]
    fn test_unregister() {
        let registry = ServiceRegistry::new();
        registry.register_numbered("shop", 2, false).unwrap();
        assert!(registry.unregister("shop").is_some());
        assert!(registry.is_empty());
    }
}
