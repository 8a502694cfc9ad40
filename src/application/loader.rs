//! Request orchestration: cache lookup, fetch, decode, delivery.

use std::sync::Arc;

use image::DynamicImage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::{CacheKey, ImageStatus, LoadOrigin, LoadedImage, Source, Viewport};
use crate::domain::errors::LoadError;
use crate::domain::ports::{RenderTarget, ResourceResolverPort};
use crate::infrastructure::cache::{BufferPool, CacheMode, TieredCache};
use crate::infrastructure::fetch::{Downloader, FetchOutcome};
use crate::infrastructure::resources::StaticResources;
use crate::infrastructure::scale;

use super::config::{ImageLoaderConfig, LoadConfig};

/// Terminal outcome of a load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The image was delivered.
    Completed,
    /// The request failed and the failure callback fired.
    Failed,
    /// The request observed cancellation and unwound silently.
    Canceled,
}

/// Handle to an in-flight load request.
///
/// Dropping the handle does not cancel the request; call [`Task::cancel`]
/// for that, or let the render target's detach hook do it.
#[derive(Debug)]
pub struct Task {
    token: CancellationToken,
    status: watch::Receiver<ImageStatus>,
    handle: JoinHandle<TaskState>,
}

impl Task {
    /// Requests cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current pipeline status of the request.
    #[must_use]
    pub fn status(&self) -> ImageStatus {
        self.status.borrow().clone()
    }

    /// Whether the request has reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the request to finish and returns its outcome.
    pub async fn join(self) -> TaskState {
        match self.handle.await {
            Ok(state) => state,
            Err(e) if e.is_cancelled() => TaskState::Canceled,
            Err(e) => {
                warn!(error = %e, "Load task panicked");
                TaskState::Failed
            }
        }
    }
}

/// The image loading engine.
///
/// Owns the cache tiers, the HTTP client, and a root cancellation token
/// that every request's token descends from, so [`ImageLoader::stop`]
/// tears down all in-flight work at once.
pub struct ImageLoader {
    cache: Arc<TieredCache>,
    downloader: Downloader,
    resources: Arc<dyn ResourceResolverPort>,
    root: parking_lot::Mutex<CancellationToken>,
}

impl ImageLoader {
    /// Builds an engine with no bundled resources.
    ///
    /// # Errors
    /// Returns an error if the disk tier cannot be opened or the HTTP
    /// client cannot be built.
    pub async fn new(config: ImageLoaderConfig) -> Result<Self, LoadError> {
        Self::with_resources(config, Arc::new(StaticResources::new())).await
    }

    /// Builds an engine backed by the given bundled-resource resolver.
    ///
    /// # Errors
    /// Returns an error if the disk tier cannot be opened or the HTTP
    /// client cannot be built.
    pub async fn with_resources(
        config: ImageLoaderConfig,
        resources: Arc<dyn ResourceResolverPort>,
    ) -> Result<Self, LoadError> {
        let mode = CacheMode::from_flags(config.disable_memory_cache, config.disable_disk_cache);
        let cache = TieredCache::new(
            mode,
            config.memory_budget,
            config.disk_root.clone(),
            config.disk_budget,
        )
        .await
        .map_err(|e| LoadError::configuration(format!("cache unavailable: {e}")))?;

        Ok(Self {
            cache: Arc::new(cache),
            downloader: Downloader::new()?,
            resources,
            root: parking_lot::Mutex::new(CancellationToken::new()),
        })
    }

    /// Starts a load request and returns its handle.
    ///
    /// Placeholder application and detach binding happen synchronously,
    /// before this method returns; everything else runs on a spawned task.
    /// Must be called from within a Tokio runtime.
    pub fn load(
        &self,
        source: Source,
        target: Option<Arc<dyn RenderTarget>>,
        config: LoadConfig,
    ) -> Task {
        let token = self.request_token();
        let (status_tx, status_rx) = watch::channel(ImageStatus::NotStarted);
        let key = CacheKey::from_source(&source);

        if let Some(target) = &target {
            if let Some(placeholder) = config.placeholder {
                target.apply_placeholder(placeholder);
            }
            let on_detach = token.clone();
            target.bind_detach(Box::new(move || on_detach.cancel()));
        }

        if let Err(e) = config.validate() {
            warn!(key = %key, error = %e, "Rejected load request");
            if let Some(callback) = &config.on_failed {
                callback(&e);
            }
            let _ = status_tx.send(ImageStatus::Failed(e.to_string()));
            let handle = tokio::spawn(async { TaskState::Failed });
            return Task {
                token,
                status: status_rx,
                handle,
            };
        }

        debug!(key = %key, "Starting load request");
        let request = Request {
            cache: self.cache.clone(),
            downloader: self.downloader.clone(),
            resources: self.resources.clone(),
            target,
            config,
            token: token.clone(),
            status: status_tx,
            key,
        };
        let handle = tokio::spawn(request.run(source));

        Task {
            token,
            status: status_rx,
            handle,
        }
    }

    /// Cancels every in-flight request. The engine stays usable; the next
    /// [`ImageLoader::load`] call starts a fresh cancellation context.
    pub fn stop(&self) {
        debug!("Stopping all in-flight requests");
        self.root.lock().cancel();
    }

    /// Empties both cache tiers.
    pub async fn clear_caches(&self) {
        use crate::domain::ports::ImageCachePort;
        self.cache.clear().await;
    }

    /// Combined byte footprint of the enabled cache tiers.
    pub async fn cache_size_bytes(&self) -> u64 {
        use crate::domain::ports::ImageCachePort;
        self.cache.size_bytes().await
    }

    /// The fixed tier combination this engine was built with.
    #[must_use]
    pub fn cache_mode(&self) -> CacheMode {
        self.cache.mode()
    }

    fn request_token(&self) -> CancellationToken {
        let mut root = self.root.lock();
        if root.is_cancelled() {
            debug!("Refreshing cancellation context after stop");
            *root = CancellationToken::new();
        }
        root.child_token()
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// One in-flight request's worth of state, moved onto the spawned task.
struct Request {
    cache: Arc<TieredCache>,
    downloader: Downloader,
    resources: Arc<dyn ResourceResolverPort>,
    target: Option<Arc<dyn RenderTarget>>,
    config: LoadConfig,
    token: CancellationToken,
    status: watch::Sender<ImageStatus>,
    key: CacheKey,
}

impl Request {
    async fn run(self, source: Source) -> TaskState {
        if self.token.is_cancelled() {
            return self.canceled();
        }

        let use_memory = !self.config.disable_memory_cache;
        let use_disk = !self.config.disable_disk_cache;

        if let Some(hit) = self.cache.get_filtered(&self.key, use_memory, use_disk).await {
            if self.token.is_cancelled() {
                return self.canceled();
            }
            let origin = if hit.from_disk {
                LoadOrigin::DiskCache
            } else {
                LoadOrigin::MemoryCache
            };
            debug!(key = %self.key, %origin, "Cache hit");
            return self.deliver(hit.image, origin);
        }

        let viewport = self
            .config
            .viewport_override()
            .or_else(|| self.target.as_ref().and_then(|t| t.viewport_hint()));
        let pool = self.cache.buffer_pool();

        let (image, origin) = match &source {
            Source::Url(url) => {
                let _ = self.status.send(ImageStatus::Downloading);
                match self.downloader.fetch(url, &self.token).await {
                    FetchOutcome::Success(bytes) => match self.decode(&bytes, viewport, pool).await
                    {
                        Ok(image) => (image, LoadOrigin::Network),
                        Err(state) => return state,
                    },
                    FetchOutcome::Error(cause) => {
                        return self.failed(LoadError::network(cause));
                    }
                    FetchOutcome::Canceled => return self.canceled(),
                }
            }
            Source::Raster(bitmap) => match self.downscale(bitmap.clone(), viewport, pool).await {
                Ok(image) => (image, LoadOrigin::Direct),
                Err(state) => return state,
            },
            Source::Resource(id) => match self.resources.resolve(*id) {
                Some(bytes) => match self.decode(&bytes, viewport, pool).await {
                    Ok(image) => (image, LoadOrigin::Direct),
                    Err(state) => return state,
                },
                None => return self.failed(LoadError::UnknownResource(*id)),
            },
        };

        if self.token.is_cancelled() {
            return self.canceled();
        }
        let image = self
            .cache
            .put_filtered(self.key.clone(), image, use_memory, use_disk)
            .await;
        if self.token.is_cancelled() {
            return self.canceled();
        }
        self.deliver(image, origin)
    }

    /// Decodes and downscales encoded bytes on the blocking pool.
    async fn decode(
        &self,
        bytes: &bytes::Bytes,
        viewport: Option<Viewport>,
        pool: Option<BufferPool>,
    ) -> Result<Arc<DynamicImage>, TaskState> {
        let _ = self.status.send(ImageStatus::Decoding);
        let bytes = bytes.clone();
        let token = self.token.clone();
        let joined = tokio::task::spawn_blocking(move || {
            // The decode may have been queued behind other blocking work;
            // skip it entirely if the request died in the meantime.
            if token.is_cancelled() {
                return Err(LoadError::Canceled);
            }
            scale::decode_downscaled(&bytes, viewport, pool.as_ref()).map(Arc::new)
        })
        .await;

        match joined {
            Ok(Ok(image)) => Ok(image),
            Ok(Err(LoadError::Canceled)) => Err(self.canceled()),
            Ok(Err(e)) => Err(self.failed(e)),
            Err(e) => Err(self.failed(LoadError::decode(format!("decode task failed: {e}")))),
        }
    }

    /// Downscales an already-decoded raster on the blocking pool. Returns
    /// the input unchanged when it already fits the viewport.
    async fn downscale(
        &self,
        bitmap: Arc<DynamicImage>,
        viewport: Option<Viewport>,
        pool: Option<BufferPool>,
    ) -> Result<Arc<DynamicImage>, TaskState> {
        let _ = self.status.send(ImageStatus::Decoding);
        let joined = tokio::task::spawn_blocking(move || {
            match scale::downscale_bitmap(&bitmap, viewport, pool.as_ref()) {
                Some(scaled) => Arc::new(scaled),
                None => bitmap,
            }
        })
        .await;

        match joined {
            Ok(image) => Ok(image),
            Err(e) => Err(self.failed(LoadError::decode(format!("scale task failed: {e}")))),
        }
    }

    fn deliver(&self, image: Arc<DynamicImage>, origin: LoadOrigin) -> TaskState {
        let _ = self.status.send(ImageStatus::Ready);
        if let Some(target) = &self.target {
            target.apply_bitmap(image.clone());
        }
        if let Some(callback) = &self.config.on_loaded {
            callback(&LoadedImage {
                key: self.key.clone(),
                image,
                origin,
            });
        }
        TaskState::Completed
    }

    fn failed(&self, error: LoadError) -> TaskState {
        warn!(key = %self.key, error = %error, "Load request failed");
        let _ = self.status.send(ImageStatus::Failed(error.to_string()));
        if let Some(callback) = &self.config.on_failed {
            callback(&error);
        }
        TaskState::Failed
    }

    /// Cancellation unwinds silently: no callbacks, no error surfaced.
    fn canceled(&self) -> TaskState {
        debug!(key = %self.key, "Load request canceled");
        let _ = self.status.send(ImageStatus::Canceled);
        TaskState::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use image::{Rgba, RgbaImage};
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn patterned(width: u32, height: u32) -> Arc<DynamicImage> {
        let mut img = RgbaImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x % 256) as u8, (y % 256) as u8, 7, 255]);
        }
        Arc::new(DynamicImage::ImageRgba8(img))
    }

    fn engine_config(dir: &TempDir) -> ImageLoaderConfig {
        ImageLoaderConfig {
            disk_root: dir.path().to_path_buf(),
            ..ImageLoaderConfig::default()
        }
    }

    #[derive(Default)]
    struct TestTarget {
        viewport: Option<Viewport>,
        applied: Mutex<Vec<Arc<DynamicImage>>>,
        placeholders: Mutex<Vec<u32>>,
        detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    }

    impl TestTarget {
        fn sized(width: u32, height: u32) -> Self {
            Self {
                viewport: Viewport::new(width, height),
                ..Self::default()
            }
        }

        fn detach(&self) {
            if let Some(hook) = self.detach.lock().take() {
                hook();
            }
        }
    }

    impl RenderTarget for TestTarget {
        fn viewport_hint(&self) -> Option<Viewport> {
            self.viewport
        }

        fn apply_bitmap(&self, image: Arc<DynamicImage>) {
            self.applied.lock().push(image);
        }

        fn apply_placeholder(&self, resource_id: u32) {
            self.placeholders.lock().push(resource_id);
        }

        fn bind_detach(&self, cancel: Box<dyn FnOnce() + Send>) {
            *self.detach.lock() = Some(cancel);
        }
    }

    #[tokio::test]
    async fn test_raster_source_delivers_directly() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let target = Arc::new(TestTarget::default());

        let task = loader.load(
            Source::Raster(patterned(8, 8)),
            Some(target.clone()),
            LoadConfig::new(),
        );

        assert_eq!(task.join().await, TaskState::Completed);
        assert_eq!(target.applied.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_raster_source_is_downscaled_to_viewport() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let target = Arc::new(TestTarget::sized(16, 16));

        let task = loader.load(
            Source::Raster(patterned(64, 32)),
            Some(target.clone()),
            LoadConfig::new(),
        );

        assert_eq!(task.join().await, TaskState::Completed);
        let applied = target.applied.lock();
        assert_eq!((applied[0].width(), applied[0].height()), (16, 8));
    }

    #[tokio::test]
    async fn test_explicit_target_size_overrides_hint() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let target = Arc::new(TestTarget::sized(16, 16));

        let task = loader.load(
            Source::Raster(patterned(64, 64)),
            Some(target.clone()),
            LoadConfig::new().with_target_size(32, 32),
        );

        assert_eq!(task.join().await, TaskState::Completed);
        let applied = target.applied.lock();
        assert_eq!((applied[0].width(), applied[0].height()), (32, 32));
    }

    #[tokio::test]
    async fn test_placeholder_applies_before_spawn() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let target = Arc::new(TestTarget::default());

        let task = loader.load(
            Source::Raster(patterned(8, 8)),
            Some(target.clone()),
            LoadConfig::new().with_placeholder(42),
        );

        // Synchronous, before the request task has run at all.
        assert_eq!(*target.placeholders.lock(), vec![42]);
        task.join().await;
    }

    #[tokio::test]
    async fn test_resource_source_decodes_bundled_bytes() {
        let dir = TempDir::new().unwrap();
        let mut png = std::io::Cursor::new(Vec::new());
        patterned(8, 8)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let resources = Arc::new(
            StaticResources::new().with(7, bytes::Bytes::from(png.into_inner())),
        );

        let loader = ImageLoader::with_resources(engine_config(&dir), resources)
            .await
            .unwrap();
        let loaded = Arc::new(Mutex::new(None));
        let sink = loaded.clone();

        let task = loader.load(
            Source::Resource(7),
            None,
            LoadConfig::new().on_loaded(move |img| *sink.lock() = Some(img.clone())),
        );

        assert_eq!(task.join().await, TaskState::Completed);
        let loaded = loaded.lock().take().unwrap();
        assert_eq!(loaded.origin, LoadOrigin::Direct);
        assert_eq!(loaded.image.width(), 8);
    }

    #[tokio::test]
    async fn test_unknown_resource_fails_with_id() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();

        let task = loader.load(
            Source::Resource(99),
            None,
            LoadConfig::new().on_failed(move |e| sink.lock().push(e.to_string())),
        );

        assert_eq!(task.join().await, TaskState::Failed);
        assert!(failures.lock()[0].contains("99"));
    }

    #[tokio::test]
    async fn test_second_load_hits_memory_cache() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let bitmap = patterned(8, 8);
        let origins = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let sink = origins.clone();
            let task = loader.load(
                Source::Raster(bitmap.clone()),
                None,
                LoadConfig::new().on_loaded(move |img| sink.lock().push(img.origin)),
            );
            assert_eq!(task.join().await, TaskState::Completed);
        }

        assert_eq!(
            *origins.lock(),
            vec![LoadOrigin::Direct, LoadOrigin::MemoryCache]
        );
    }

    #[tokio::test]
    async fn test_cache_bypass_reloads_from_source() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let bitmap = patterned(8, 8);
        let origins = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let sink = origins.clone();
            let task = loader.load(
                Source::Raster(bitmap.clone()),
                None,
                LoadConfig::new()
                    .without_memory_cache()
                    .without_disk_cache()
                    .on_loaded(move |img| sink.lock().push(img.origin)),
            );
            assert_eq!(task.join().await, TaskState::Completed);
        }

        assert_eq!(*origins.lock(), vec![LoadOrigin::Direct, LoadOrigin::Direct]);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_spawning_work() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let failures = Arc::new(AtomicU32::new(0));
        let sink = failures.clone();

        let task = loader.load(
            Source::Raster(patterned(8, 8)),
            None,
            LoadConfig::new()
                .with_target_size(-5, 10)
                .on_failed(move |_| {
                    sink.fetch_add(1, Ordering::SeqCst);
                }),
        );

        // Rejection happens synchronously inside load().
        assert!(task.status().is_terminal());
        assert_eq!(task.join().await, TaskState::Failed);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_cancels_without_callbacks() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
        let target = Arc::new(TestTarget::default());
        let calls = Arc::new(AtomicU32::new(0));
        let (loaded, failed) = (calls.clone(), calls.clone());

        // Detach synchronously, before the spawned request observes the
        // token at its first checkpoint.
        let task = loader.load(
            Source::Raster(patterned(8, 8)),
            Some(target.clone()),
            LoadConfig::new()
                .on_loaded(move |_| {
                    loaded.fetch_add(1, Ordering::SeqCst);
                })
                .on_failed(move |_| {
                    failed.fetch_add(1, Ordering::SeqCst);
                }),
        );
        target.detach();

        assert_eq!(task.join().await, TaskState::Canceled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(target.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_and_next_load_recovers() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();

        loader.stop();
        let task = loader.load(Source::Raster(patterned(8, 8)), None, LoadConfig::new());

        // The token was minted from a fresh context after stop().
        assert_eq!(task.join().await, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_requests() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();

        let task = loader.load(Source::Raster(patterned(8, 8)), None, LoadConfig::new());
        loader.stop();

        // Either outcome is a race win; what matters is no hang and no panic.
        let state = task.join().await;
        assert!(matches!(state, TaskState::Completed | TaskState::Canceled));
    }

    #[tokio::test]
    async fn test_clear_caches_empties_tiers() {
        let dir = TempDir::new().unwrap();
        let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();

        let task = loader.load(Source::Raster(patterned(8, 8)), None, LoadConfig::new());
        assert_eq!(task.join().await, TaskState::Completed);
        assert!(loader.cache_size_bytes().await > 0);

        loader.clear_caches().await;
        assert_eq!(loader.cache_size_bytes().await, 0);
    }

    mod end_to_end {
        use super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        fn encode_png(image: &DynamicImage) -> Vec<u8> {
            let mut png = std::io::Cursor::new(Vec::new());
            image.write_to(&mut png, image::ImageFormat::Png).unwrap();
            png.into_inner()
        }

        /// Serves the body to every connection, counting accepts.
        async fn serve_counted(body: Vec<u8>, hits: Arc<AtomicU32>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                loop {
                    let Ok((mut stream, _)) = listener.accept().await else {
                        break;
                    };
                    hits.fetch_add(1, Ordering::SeqCst);
                    let body = body.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        loop {
                            let n = stream.read(&mut buf).await.unwrap_or(0);
                            if n == 0 || buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                        let header = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        );
                        let _ = stream.write_all(header.as_bytes()).await;
                        let _ = stream.write_all(&body).await;
                        let _ = stream.flush().await;
                    });
                }
            });
            format!("http://{addr}/image.png")
        }

        #[tokio::test]
        async fn test_url_load_then_memory_hit() {
            let dir = TempDir::new().unwrap();
            let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
            let hits = Arc::new(AtomicU32::new(0));
            let url = serve_counted(encode_png(&patterned(32, 32)), hits.clone()).await;
            let origins = Arc::new(Mutex::new(Vec::new()));

            for _ in 0..2 {
                let sink = origins.clone();
                let target = Arc::new(TestTarget::default());
                let task = loader.load(
                    Source::url(&url),
                    Some(target.clone()),
                    LoadConfig::new().on_loaded(move |img| sink.lock().push(img.origin)),
                );
                assert_eq!(task.join().await, TaskState::Completed);
                assert_eq!(target.applied.lock().len(), 1);
            }

            assert_eq!(
                *origins.lock(),
                vec![LoadOrigin::Network, LoadOrigin::MemoryCache]
            );
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn test_url_load_downscales_to_viewport() {
            let dir = TempDir::new().unwrap();
            let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
            let url =
                serve_counted(encode_png(&patterned(800, 400)), Arc::new(AtomicU32::new(0)))
                    .await;
            let target = Arc::new(TestTarget::sized(200, 200));

            let task = loader.load(Source::url(&url), Some(target.clone()), LoadConfig::new());

            assert_eq!(task.join().await, TaskState::Completed);
            let applied = target.applied.lock();
            assert_eq!((applied[0].width(), applied[0].height()), (200, 100));
        }

        #[tokio::test]
        async fn test_http_failure_surfaces_network_error() {
            let dir = TempDir::new().unwrap();
            let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
            // Bind then drop so the connection is refused.
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let failures = Arc::new(Mutex::new(Vec::new()));
            let sink = failures.clone();

            let task = loader.load(
                Source::url(format!("http://{addr}/gone.png")),
                None,
                LoadConfig::new().on_failed(move |e| sink.lock().push(e.clone())),
            );

            assert_eq!(task.join().await, TaskState::Failed);
            assert!(matches!(failures.lock()[0], LoadError::Network(_)));
            assert_eq!(loader.cache_size_bytes().await, 0);
        }

        #[tokio::test]
        async fn test_garbage_body_surfaces_decode_error() {
            let dir = TempDir::new().unwrap();
            let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
            let url =
                serve_counted(b"not an image".to_vec(), Arc::new(AtomicU32::new(0))).await;
            let failures = Arc::new(Mutex::new(Vec::new()));
            let sink = failures.clone();

            let task = loader.load(
                Source::url(&url),
                None,
                LoadConfig::new().on_failed(move |e| sink.lock().push(e.clone())),
            );

            assert_eq!(task.join().await, TaskState::Failed);
            assert!(matches!(failures.lock()[0], LoadError::Decode(_)));
        }

        #[tokio::test]
        async fn test_cancel_mid_download_caches_nothing() {
            let dir = TempDir::new().unwrap();
            let loader = ImageLoader::new(engine_config(&dir)).await.unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                // Promise more bytes than are ever sent, then stall.
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n")
                    .await
                    .unwrap();
                stream.write_all(&[0u8; 1024]).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            });
            let calls = Arc::new(AtomicU32::new(0));
            let (loaded, failed) = (calls.clone(), calls.clone());

            let task = loader.load(
                Source::url(format!("http://{addr}/stalled.png")),
                None,
                LoadConfig::new()
                    .on_loaded(move |_| {
                        loaded.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_failed(move |_| {
                        failed.fetch_add(1, Ordering::SeqCst);
                    }),
            );

            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            assert_eq!(task.status(), ImageStatus::Downloading);
            task.cancel();

            assert_eq!(task.join().await, TaskState::Canceled);
            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(loader.cache_size_bytes().await, 0);
        }

        #[tokio::test]
        async fn test_disk_only_mode_survives_url_reload() {
            let dir = TempDir::new().unwrap();
            let config = ImageLoaderConfig {
                disable_memory_cache: true,
                ..engine_config(&dir)
            };
            let loader = ImageLoader::new(config).await.unwrap();
            let hits = Arc::new(AtomicU32::new(0));
            let url = serve_counted(encode_png(&patterned(16, 16)), hits.clone()).await;
            let origins = Arc::new(Mutex::new(Vec::new()));

            for _ in 0..2 {
                let sink = origins.clone();
                let task = loader.load(
                    Source::url(&url),
                    None,
                    LoadConfig::new().on_loaded(move |img| sink.lock().push(img.origin)),
                );
                assert_eq!(task.join().await, TaskState::Completed);
            }

            assert_eq!(
                *origins.lock(),
                vec![LoadOrigin::Network, LoadOrigin::DiskCache]
            );
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }
    }
}
