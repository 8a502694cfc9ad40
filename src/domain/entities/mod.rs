//! Domain entity definitions.

mod image;
mod source;

pub use image::{ImageStatus, LoadOrigin, LoadedImage, Viewport, bitmap_byte_size};
pub use source::{CacheKey, Source};
