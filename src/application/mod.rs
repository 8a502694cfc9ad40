//! Application layer orchestrating loads over the domain ports.

/// Engine and per-request configuration.
pub mod config;
/// The load-request orchestrator and its task handles.
pub mod loader;

pub use config::{FailedCallback, ImageLoaderConfig, LoadConfig, LoadedCallback};
pub use loader::{ImageLoader, Task, TaskState};
