//! Infrastructure layer with cache, network and scaling adapters.

/// Cache tiers and their composition.
pub mod cache;
/// Streamed downloads with cooperative cancellation.
pub mod fetch;
/// Bundled resource registry.
pub mod resources;
/// Bitmap downsampling.
pub mod scale;

pub use cache::{
    BufferPool, CacheMode, CacheStats, DEFAULT_DISK_BUDGET, DEFAULT_MEMORY_BUDGET, DiskCache,
    MemoryCache, TieredCache,
};
pub use fetch::{Downloader, FetchOutcome};
pub use resources::StaticResources;
