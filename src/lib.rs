//! Bildr - An asynchronous image loading engine.
//!
//! This crate fetches, decodes, downscales, and caches images behind a
//! two-tier cache (in-memory LRU over a persistent disk store), with
//! cooperative cancellation tied to the consumer's render-target lifecycle.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer orchestrating load requests.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache tiers, network, and decoding.
pub mod infrastructure;

pub use application::{ImageLoader, ImageLoaderConfig, LoadConfig, Task, TaskState};
pub use domain::entities::{
    CacheKey, ImageStatus, LoadOrigin, LoadedImage, Source, Viewport,
};
pub use domain::errors::LoadError;
pub use domain::ports::{ImageCachePort, RenderTarget, ResourceResolverPort};
pub use infrastructure::cache::CacheMode;
pub use infrastructure::resources::StaticResources;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "bildr";
