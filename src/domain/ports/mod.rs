mod cache_port;
mod render_target;
mod resource_port;

pub use cache_port::{CacheError, CacheResult, ImageCachePort};
pub use render_target::RenderTarget;
pub use resource_port::ResourceResolverPort;
