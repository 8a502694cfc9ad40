//! Two-tier cache composition: memory over disk.

use std::path::PathBuf;
use std::sync::Arc;

use image::DynamicImage;
use tracing::debug;

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheResult, ImageCachePort};

use super::disk::DiskCache;
use super::memory::{BufferPool, MemoryCache};

/// Tier combination, fixed for the lifetime of the cache once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// No caching: every lookup misses and puts are discarded.
    Disabled,
    /// In-memory LRU tier only.
    MemoryOnly,
    /// Persistent tier only.
    DiskOnly,
    /// Memory tier in front of disk, with eviction promoting downward.
    MemoryOverDisk,
}

impl CacheMode {
    /// Derives the mode from the two disable flags.
    #[must_use]
    pub const fn from_flags(disable_memory: bool, disable_disk: bool) -> Self {
        match (disable_memory, disable_disk) {
            (true, true) => Self::Disabled,
            (true, false) => Self::DiskOnly,
            (false, true) => Self::MemoryOnly,
            (false, false) => Self::MemoryOverDisk,
        }
    }
}

/// Composed cache facade over the optional memory and disk tiers.
///
/// Lookups prefer memory and fall through to disk; a disk hit is *not*
/// promoted back into memory, so a single cold read cannot thrash the hot
/// tier. Writes land in the fastest enabled tier; when both tiers are
/// enabled, memory evictions are promoted into disk through the eviction
/// listener wired at construction, off the eviction hot path.
pub struct TieredCache {
    memory: Option<Arc<MemoryCache>>,
    disk: Option<Arc<DiskCache>>,
    mode: CacheMode,
}

impl TieredCache {
    /// Builds the tier combination for `mode`.
    ///
    /// `disk_root` and `disk_budget` are ignored unless a disk tier is
    /// enabled; `memory_budget` likewise for the memory tier.
    ///
    /// # Errors
    /// Returns an error if the disk tier cannot be opened.
    pub async fn new(
        mode: CacheMode,
        memory_budget: u64,
        disk_root: PathBuf,
        disk_budget: u64,
    ) -> CacheResult<Self> {
        let (memory, disk) = match mode {
            CacheMode::Disabled => (None, None),
            CacheMode::MemoryOnly => (Some(Arc::new(MemoryCache::new(memory_budget))), None),
            CacheMode::DiskOnly => (
                None,
                Some(Arc::new(DiskCache::new(disk_root, disk_budget).await?)),
            ),
            CacheMode::MemoryOverDisk => {
                let disk = Arc::new(DiskCache::new(disk_root, disk_budget).await?);
                let disk_tier = disk.clone();
                let memory = MemoryCache::with_evict_listener(
                    memory_budget,
                    Box::new(move |key, image| {
                        // Promote asynchronously; the listener runs under the
                        // memory store lock and must not block on disk I/O.
                        let disk = disk_tier.clone();
                        tokio::spawn(async move {
                            disk.put(key, image).await;
                        });
                    }),
                );
                (Some(Arc::new(memory)), Some(disk))
            }
        };

        debug!(?mode, "Constructed cache tiers");
        Ok(Self { memory, disk, mode })
    }

    /// Returns the fixed tier combination.
    #[must_use]
    pub const fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Returns the memory tier's buffer pool, when that tier is enabled.
    #[must_use]
    pub fn buffer_pool(&self) -> Option<BufferPool> {
        self.memory.as_ref().map(|m| m.buffer_pool())
    }

    /// Lookup honoring per-request tier bypasses.
    pub async fn get_filtered(
        &self,
        key: &CacheKey,
        use_memory: bool,
        use_disk: bool,
    ) -> Option<TieredHit> {
        if use_memory
            && let Some(memory) = &self.memory
            && let Some(image) = memory.get(key).await
        {
            return Some(TieredHit {
                image,
                from_disk: false,
            });
        }
        if use_disk
            && let Some(disk) = &self.disk
            && let Some(image) = disk.get(key).await
        {
            // Deliberately not re-inserted into the memory tier.
            return Some(TieredHit {
                image,
                from_disk: true,
            });
        }
        None
    }

    /// Write honoring per-request tier bypasses; lands in the fastest
    /// enabled, non-bypassed tier.
    pub async fn put_filtered(
        &self,
        key: CacheKey,
        image: Arc<DynamicImage>,
        use_memory: bool,
        use_disk: bool,
    ) -> Arc<DynamicImage> {
        if use_memory && let Some(memory) = &self.memory {
            return memory.put(key, image).await;
        }
        if use_disk && let Some(disk) = &self.disk {
            return disk.put(key, image).await;
        }
        image
    }
}

/// A lookup result, tagged with the tier it came from.
#[derive(Debug, Clone)]
pub struct TieredHit {
    /// The cached bitmap.
    pub image: Arc<DynamicImage>,
    /// True when served by the disk tier.
    pub from_disk: bool,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ImageCachePort for TieredCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        self.get_filtered(key, true, true).await.map(|hit| hit.image)
    }

    async fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> Arc<DynamicImage> {
        self.put_filtered(key, image, true, true).await
    }

    async fn size_bytes(&self) -> u64 {
        let mut total = 0;
        if let Some(memory) = &self.memory {
            total += memory.size_bytes().await;
        }
        if let Some(disk) = &self.disk {
            total += disk.size_bytes().await;
        }
        total
    }

    async fn clear(&self) {
        if let Some(memory) = &self.memory {
            memory.clear().await;
        }
        if let Some(disk) = &self.disk {
            disk.clear().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bitmap(width: u32, height: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::new_rgba8(width, height))
    }

    async fn tiered(dir: &TempDir, mode: CacheMode, memory_budget: u64) -> TieredCache {
        TieredCache::new(mode, memory_budget, dir.path().to_path_buf(), u64::MAX)
            .await
            .unwrap()
    }

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(CacheMode::from_flags(true, true), CacheMode::Disabled);
        assert_eq!(CacheMode::from_flags(true, false), CacheMode::DiskOnly);
        assert_eq!(CacheMode::from_flags(false, true), CacheMode::MemoryOnly);
        assert_eq!(CacheMode::from_flags(false, false), CacheMode::MemoryOverDisk);
    }

    #[tokio::test]
    async fn test_disabled_mode_discards_puts() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, CacheMode::Disabled, 1024).await;
        let key = CacheKey::new("a");

        cache.put(key.clone(), bitmap(4, 4)).await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.size_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_memory_hit_wins() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, CacheMode::MemoryOverDisk, 1024 * 1024).await;
        let key = CacheKey::new("a");

        cache.put(key.clone(), bitmap(4, 4)).await;
        let hit = cache.get_filtered(&key, true, true).await.unwrap();

        assert!(!hit.from_disk);
    }

    #[tokio::test]
    async fn test_eviction_promotes_to_disk() {
        let dir = TempDir::new().unwrap();
        // Budget fits two 400-byte bitmaps; the third put evicts the first.
        let cache = tiered(&dir, CacheMode::MemoryOverDisk, 900).await;
        let first = CacheKey::new("a");

        cache.put(first.clone(), bitmap(10, 10)).await;
        cache.put(CacheKey::new("b"), bitmap(10, 10)).await;
        cache.put(CacheKey::new("c"), bitmap(10, 10)).await;

        // Promotion is dispatched off the eviction path; give it a beat.
        let mut hit = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            hit = cache.get_filtered(&first, true, true).await;
            if hit.is_some() {
                break;
            }
        }
        assert!(hit.is_some_and(|h| h.from_disk));
    }

    #[tokio::test]
    async fn test_disk_hit_is_not_promoted_to_memory() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, CacheMode::MemoryOverDisk, 1024 * 1024).await;
        let key = CacheKey::new("a");

        // Seed the disk tier directly.
        cache.put_filtered(key.clone(), bitmap(4, 4), false, true).await;

        let hit = cache.get(&key).await;
        assert!(hit.is_some());

        // Still served from disk on the second read.
        let second = cache.get_filtered(&key, true, true).await.unwrap();
        assert!(second.from_disk);
    }

    #[tokio::test]
    async fn test_per_request_bypass() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, CacheMode::MemoryOverDisk, 1024 * 1024).await;
        let key = CacheKey::new("a");

        cache.put(key.clone(), bitmap(4, 4)).await;

        assert!(cache.get_filtered(&key, false, true).await.is_none());
        assert!(cache.get_filtered(&key, true, false).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_empties_both_tiers() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, CacheMode::MemoryOverDisk, 1024 * 1024).await;
        let key = CacheKey::new("a");

        cache.put(key.clone(), bitmap(4, 4)).await;
        cache.put_filtered(CacheKey::new("b"), bitmap(4, 4), false, true).await;
        cache.clear().await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.size_bytes().await, 0);
    }
}
