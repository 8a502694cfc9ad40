//! Port definition for image caching.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::CacheKey;

/// Result type for cache-internal operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors internal to the cache tiers.
///
/// These never cross the request boundary: a best-effort cache write is not
/// allowed to fail a load, so the stores log and swallow them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// File I/O failure in the persistent tier.
    #[error("io error: {0}")]
    Io(String),
    /// Failed to encode a bitmap for persistence.
    #[error("encode error: {0}")]
    Encode(String),
    /// Failed to decode a persisted bitmap.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Port for a key-addressed bitmap cache.
/// Implemented by every tier, including the composed one.
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get a bitmap. Never mutates size or ordering on a miss.
    async fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>>;

    /// Stores a bitmap and returns it, enabling chained use.
    async fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> Arc<DynamicImage>;

    /// Current byte footprint of the cache.
    async fn size_bytes(&self) -> u64;

    /// Removes every entry.
    async fn clear(&self);
}
