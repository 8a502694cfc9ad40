//! Port definition for bundled resource resolution.

use bytes::Bytes;

/// Resolves a bundled resource id to its encoded image bytes.
///
/// Stands in for a platform resource table; the default implementation is an
/// in-memory registry populated by the embedding application.
pub trait ResourceResolverPort: Send + Sync {
    /// Returns the encoded bytes for a resource id, or `None` if unknown.
    fn resolve(&self, id: u32) -> Option<Bytes>;
}
