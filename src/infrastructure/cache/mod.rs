//! Cache tiers: in-memory LRU, persistent disk, and their composition.

mod disk;
mod memory;
mod tiered;

pub use disk::{DEFAULT_DISK_BUDGET, DiskCache};
pub use memory::{BufferPool, CacheStats, DEFAULT_MEMORY_BUDGET, EvictListener, MemoryCache};
pub use tiered::{CacheMode, TieredCache, TieredHit};
