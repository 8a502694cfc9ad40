//! In-memory byte-budget LRU cache with eviction notification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, bitmap_byte_size};
use crate::domain::ports::ImageCachePort;

/// Default memory budget in bytes, standing in for a fraction (1/8) of the
/// process heap ceiling the way the original runtime derives it.
pub const DEFAULT_MEMORY_BUDGET: u64 = 32 * 1024 * 1024;

/// Callback invoked for each entry evicted over budget, before the store
/// drops its own reference. Runs under the store lock; it must not reenter
/// the cache.
pub type EvictListener = Box<dyn Fn(CacheKey, Arc<DynamicImage>) + Send + Sync>;

/// Pool of reclaimed pixel buffers offered back to the resampler.
///
/// Buffers become reclaimable when an evicted bitmap is no longer referenced
/// anywhere else; eligibility on `take` is by capacity, so a request is only
/// served by a buffer at least as large. Retention is bounded by buffer
/// count.
#[derive(Clone)]
pub struct BufferPool {
    buffers: Arc<parking_lot::Mutex<Vec<Vec<u8>>>>,
    max_buffers: usize,
}

impl BufferPool {
    /// Creates a pool retaining at most `max_buffers` buffers.
    #[must_use]
    pub fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Arc::new(parking_lot::Mutex::new(Vec::new())),
            max_buffers,
        }
    }

    /// Offers a buffer for reuse. Dropped when the pool is full.
    pub fn offer(&self, buf: Vec<u8>) {
        if buf.capacity() == 0 {
            return;
        }
        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            trace!(capacity = buf.capacity(), "Retaining evicted pixel buffer");
            buffers.push(buf);
        }
    }

    /// Takes a buffer whose capacity covers `min_len`, if one is retained.
    #[must_use]
    pub fn take(&self, min_len: usize) -> Option<Vec<u8>> {
        let mut buffers = self.buffers.lock();
        let idx = buffers.iter().position(|b| b.capacity() >= min_len)?;
        Some(buffers.swap_remove(idx))
    }

    /// Returns true if no buffers are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("retained", &self.buffers.lock().len())
            .field("max_buffers", &self.max_buffers)
            .finish()
    }
}

struct MemoryState {
    entries: LruCache<CacheKey, Arc<DynamicImage>>,
    total_bytes: u64,
}

/// Byte-budget LRU cache for decoded bitmaps.
///
/// All LRU bookkeeping and size accounting is serialized behind one lock so
/// order and totals stay consistent under concurrent use.
pub struct MemoryCache {
    state: RwLock<MemoryState>,
    budget_bytes: u64,
    on_evict: Option<EvictListener>,
    pool: BufferPool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates a cache with the given byte budget and no eviction listener.
    #[must_use]
    pub fn new(budget_bytes: u64) -> Self {
        Self::build(budget_bytes, None)
    }

    /// Creates a cache whose evictions are reported to `listener`.
    #[must_use]
    pub fn with_evict_listener(budget_bytes: u64, listener: EvictListener) -> Self {
        Self::build(budget_bytes, Some(listener))
    }

    fn build(budget_bytes: u64, on_evict: Option<EvictListener>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            budget_bytes,
            on_evict,
            pool: BufferPool::new(8),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the configured byte budget.
    #[must_use]
    pub const fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// Returns a handle to the reclaimed-buffer pool.
    #[must_use]
    pub fn buffer_pool(&self) -> BufferPool {
        self.pool.clone()
    }

    /// Peeks at an entry without promoting it in the LRU order.
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let state = self.state.read().await;
        state.entries.peek(key).cloned()
    }

    /// Returns hit/miss statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn evict_over_budget(&self, state: &mut MemoryState) {
        while state.total_bytes > self.budget_bytes {
            let Some((key, evicted)) = state.entries.pop_lru() else {
                break;
            };
            state.total_bytes = state.total_bytes.saturating_sub(bitmap_byte_size(&evicted));
            debug!(key = %key, "Evicting least-recently-used entry");

            if let Some(listener) = &self.on_evict {
                listener(key, evicted.clone());
            }

            // Reclaim the pixel buffer when nothing else holds the bitmap.
            if let Ok(image) = Arc::try_unwrap(evicted) {
                self.pool.offer(image.into_bytes());
            }
        }
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("budget_bytes", &self.budget_bytes)
            .field("has_evict_listener", &self.on_evict.is_some())
            .finish_non_exhaustive()
    }
}

/// Hit/miss counters for the memory tier.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Number of lookups served from the tier.
    pub hits: u64,
    /// Number of lookups that missed.
    pub misses: u64,
}

#[async_trait::async_trait]
impl ImageCachePort for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut state = self.state.write().await;
        if let Some(image) = state.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    async fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> Arc<DynamicImage> {
        let size = bitmap_byte_size(&image);
        let mut state = self.state.write().await;
        if let Some(replaced) = state.entries.put(key.clone(), image.clone()) {
            state.total_bytes = state
                .total_bytes
                .saturating_sub(bitmap_byte_size(&replaced));
        }
        state.total_bytes += size;
        debug!(key = %key, size = size, total = state.total_bytes, "Stored bitmap in memory cache");

        self.evict_over_budget(&mut state);
        image
    }

    async fn size_bytes(&self) -> u64 {
        self.state.read().await.total_bytes
    }

    async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.total_bytes = 0;
        debug!("Cleared memory cache");
    }
}
