//! In-memory bundled resource registry.

use std::collections::HashMap;

use bytes::Bytes;

use crate::domain::ports::ResourceResolverPort;

/// Immutable id-to-bytes table for bundled resources.
///
/// Populated by the embedding application at construction, typically from
/// `include_bytes!` assets.
#[derive(Debug, Clone, Default)]
pub struct StaticResources {
    entries: HashMap<u32, Bytes>,
}

impl StaticResources {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers encoded image bytes under a resource id.
    #[must_use]
    pub fn with(mut self, id: u32, bytes: impl Into<Bytes>) -> Self {
        self.entries.insert(id, bytes.into());
        self
    }

    /// Returns the number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceResolverPort for StaticResources {
    fn resolve(&self, id: u32) -> Option<Bytes> {
        self.entries.get(&id).cloned()
    }
}
