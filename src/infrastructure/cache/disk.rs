//! Persistent disk tier, one file per cache key.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

use image::{DynamicImage, ImageFormat};
use tokio::fs;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult, ImageCachePort};

/// Default disk budget in bytes, standing in for a quarter of the
/// memory-derived ceiling the original computes at runtime.
pub const DEFAULT_DISK_BUDGET: u64 = 128 * 1024 * 1024;

/// Capacity-bounded persistent cache rooted at a dedicated directory.
///
/// The filename is the cache key and the file contents are the PNG-encoded
/// bitmap; presence of the file is the only source of truth, there is no
/// index. Size and count are tracked in atomics and rebuilt from a directory
/// scan at construction.
pub struct DiskCache {
    root: PathBuf,
    budget_bytes: u64,
    current_bytes: AtomicU64,
    entry_count: AtomicUsize,
    // Serializes the stat-write-account-reclaim sequence; without it,
    // concurrent puts of one key each miss the stat and double-count.
    write_lock: tokio::sync::Mutex<()>,
}

impl DiskCache {
    /// Opens (creating if needed) a disk cache rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created or scanned.
    pub async fn new(root: PathBuf, budget_bytes: u64) -> CacheResult<Self> {
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CacheError::Io(format!("failed to create cache root: {e}")))?;

        let mut total = 0u64;
        let mut count = 0usize;
        let mut entries = fs::read_dir(&root)
            .await
            .map_err(|e| CacheError::Io(format!("failed to scan cache root: {e}")))?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                total += meta.len();
                count += 1;
            }
        }
        debug!(root = %root.display(), bytes = total, files = count, "Opened disk cache");

        let cache = Self {
            root,
            budget_bytes,
            current_bytes: AtomicU64::new(total),
            entry_count: AtomicUsize::new(count),
            write_lock: tokio::sync::Mutex::new(()),
        };
        cache.reclaim_over_budget().await;
        Ok(cache)
    }

    /// Returns the number of persisted entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Encodes and persists a bitmap, then reclaims space if over budget.
    ///
    /// # Errors
    /// Returns an error if encoding or the file write fails.
    pub async fn write(&self, key: &CacheKey, image: Arc<DynamicImage>) -> CacheResult<()> {
        let encoded = tokio::task::spawn_blocking(move || -> CacheResult<Vec<u8>> {
            let mut out = Vec::new();
            image
                .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
                .map_err(|e| CacheError::Encode(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| CacheError::Encode(format!("encode task panicked: {e}")))??;

        // Writes are serialized per store; only encoding runs concurrently.
        let _write_guard = self.write_lock.lock().await;
        let path = self.entry_path(key);
        let replaced = fs::metadata(&path).await.map(|m| m.len()).ok();

        fs::write(&path, &encoded)
            .await
            .map_err(|e| CacheError::Io(format!("failed to write cache file: {e}")))?;

        let new_len = encoded.len() as u64;
        match replaced {
            Some(old) => {
                if new_len >= old {
                    self.current_bytes.fetch_add(new_len - old, Ordering::Relaxed);
                } else {
                    self.current_bytes.fetch_sub(old - new_len, Ordering::Relaxed);
                }
            }
            None => {
                self.current_bytes.fetch_add(new_len, Ordering::Relaxed);
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(key = %key, bytes = new_len, "Persisted bitmap to disk cache");

        self.reclaim_over_budget().await;
        Ok(())
    }

    /// Deletes persisted files, oldest modification time first, until usage
    /// is back under budget with ten percent headroom.
    async fn reclaim_over_budget(&self) {
        let current = self.current_bytes.load(Ordering::Relaxed);
        if current <= self.budget_bytes {
            return;
        }
        debug!(
            current = current,
            budget = self.budget_bytes,
            "Disk cache over budget, reclaiming"
        );

        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return;
        };
        let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((entry.path(), modified, meta.len()));
            }
        }
        files.sort_by_key(|(_, modified, _)| *modified);

        let target = current - self.budget_bytes + self.budget_bytes / 10;
        let mut freed = 0u64;
        let mut removed = 0usize;
        for (path, _, len) in files {
            if freed >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to reclaim cache file");
            } else {
                freed += len;
                removed += 1;
            }
        }
        self.current_bytes.fetch_sub(freed, Ordering::Relaxed);
        self.entry_count.fetch_sub(removed, Ordering::Relaxed);
        debug!(freed = freed, removed = removed, "Disk cache reclaim complete");
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("budget_bytes", &self.budget_bytes)
            .field("current_bytes", &self.current_bytes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ImageCachePort for DiskCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let path = self.entry_path(key);
        let Ok(bytes) = fs::read(&path).await else {
            trace!(key = %key, "Disk cache miss");
            return None;
        };

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;
        match decoded {
            Ok(Ok(image)) => {
                trace!(key = %key, "Disk cache hit");
                Some(Arc::new(image))
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Failed to decode persisted bitmap");
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                None
            }
        }
    }

    async fn put(&self, key: CacheKey, image: Arc<DynamicImage>) -> Arc<DynamicImage> {
        // Best-effort persistence: a failed write never fails the request.
        if let Err(e) = self.write(&key, image.clone()).await {
            warn!(key = %key, error = %e, "Failed to persist bitmap");
        }
        image
    }

    async fn size_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    async fn clear(&self) {
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Err(e) = fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove cache file");
            }
        }
        self.current_bytes.store(0, Ordering::Relaxed);
        self.entry_count.store(0, Ordering::Relaxed);
        debug!("Cleared disk cache");
    }
}
