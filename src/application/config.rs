//! Engine and per-request configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::entities::{LoadedImage, Viewport};
use crate::domain::errors::LoadError;
use crate::infrastructure::cache::{DEFAULT_DISK_BUDGET, DEFAULT_MEMORY_BUDGET};

/// Success callback, invoked at most once per request.
pub type LoadedCallback = Arc<dyn Fn(&LoadedImage) + Send + Sync>;

/// Failure callback, invoked at most once per request. Never sees
/// [`LoadError::Canceled`].
pub type FailedCallback = Arc<dyn Fn(&LoadError) + Send + Sync>;

/// Engine-level configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ImageLoaderConfig {
    /// Disables the in-memory tier for the whole engine.
    pub disable_memory_cache: bool,
    /// Disables the persistent tier for the whole engine.
    pub disable_disk_cache: bool,
    /// Byte budget for the memory tier.
    pub memory_budget: u64,
    /// Byte budget for the disk tier.
    pub disk_budget: u64,
    /// Root directory for the disk tier.
    pub disk_root: PathBuf,
}

impl Default for ImageLoaderConfig {
    fn default() -> Self {
        Self {
            disable_memory_cache: false,
            disable_disk_cache: false,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            disk_budget: DEFAULT_DISK_BUDGET,
            disk_root: std::env::temp_dir().join("bildr"),
        }
    }
}

/// Per-request option set. Immutable once the load begins.
#[derive(Clone, Default)]
pub struct LoadConfig {
    /// Bypasses the memory tier for this request only.
    pub disable_memory_cache: bool,
    /// Bypasses the disk tier for this request only.
    pub disable_disk_cache: bool,
    /// Placeholder resource applied to the target before any suspension.
    pub placeholder: Option<u32>,
    /// Explicit target width, overriding the render target's hint.
    pub target_width: Option<i32>,
    /// Explicit target height, overriding the render target's hint.
    pub target_height: Option<i32>,
    pub(crate) on_loaded: Option<LoadedCallback>,
    pub(crate) on_failed: Option<FailedCallback>,
}

impl LoadConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypasses the memory tier for this request.
    #[must_use]
    pub const fn without_memory_cache(mut self) -> Self {
        self.disable_memory_cache = true;
        self
    }

    /// Bypasses the disk tier for this request.
    #[must_use]
    pub const fn without_disk_cache(mut self) -> Self {
        self.disable_disk_cache = true;
        self
    }

    /// Sets the placeholder resource.
    #[must_use]
    pub const fn with_placeholder(mut self, resource_id: u32) -> Self {
        self.placeholder = Some(resource_id);
        self
    }

    /// Sets an explicit target box, overriding the render target's hint.
    #[must_use]
    pub const fn with_target_size(mut self, width: i32, height: i32) -> Self {
        self.target_width = Some(width);
        self.target_height = Some(height);
        self
    }

    /// Registers the success callback.
    #[must_use]
    pub fn on_loaded(mut self, callback: impl Fn(&LoadedImage) + Send + Sync + 'static) -> Self {
        self.on_loaded = Some(Arc::new(callback));
        self
    }

    /// Registers the failure callback.
    #[must_use]
    pub fn on_failed(mut self, callback: impl Fn(&LoadError) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(callback));
        self
    }

    /// Rejects configurations no load could honor.
    ///
    /// # Errors
    /// Returns [`LoadError::Configuration`] for negative target dimensions.
    pub fn validate(&self) -> Result<(), LoadError> {
        for (name, value) in [
            ("target width", self.target_width),
            ("target height", self.target_height),
        ] {
            if let Some(v) = value
                && v < 0
            {
                return Err(LoadError::configuration(format!("negative {name}: {v}")));
            }
        }
        Ok(())
    }

    /// Returns the explicit target box, when both dimensions are positive.
    /// Absent or zero dimensions mean native resolution.
    #[must_use]
    pub fn viewport_override(&self) -> Option<Viewport> {
        let width = u32::try_from(self.target_width?).ok()?;
        let height = u32::try_from(self.target_height?).ok()?;
        Viewport::new(width, height)
    }
}

impl std::fmt::Debug for LoadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadConfig")
            .field("disable_memory_cache", &self.disable_memory_cache)
            .field("disable_disk_cache", &self.disable_disk_cache)
            .field("placeholder", &self.placeholder)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("has_on_loaded", &self.on_loaded.is_some())
            .field("has_on_failed", &self.on_failed.is_some())
            .finish()
    }
}
