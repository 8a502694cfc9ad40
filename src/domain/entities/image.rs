//! Domain types for loaded images and target viewports.

use std::sync::Arc;

use image::DynamicImage;

use super::CacheKey;

/// Target box a loaded image should be downscaled toward.
/// Zero dimensions are never representable; use [`Viewport::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
}

impl Viewport {
    /// Creates a viewport, returning `None` when either dimension is zero.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            None
        } else {
            Some(Self { width, height })
        }
    }
}

/// Returns the decoded byte footprint of a bitmap, used for quota accounting.
#[must_use]
pub fn bitmap_byte_size(image: &DynamicImage) -> u64 {
    image.as_bytes().len() as u64
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Served from the in-memory LRU tier.
    MemoryCache,
    /// Served from the persistent disk tier.
    DiskCache,
    /// Downloaded from the network.
    Network,
    /// Decoded directly from a raster or bundled resource.
    Direct,
}

impl std::fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// A successfully loaded image, handed to the success callback.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key the image is stored under.
    pub key: CacheKey,
    /// The decoded, already-downscaled bitmap.
    pub image: Arc<DynamicImage>,
    /// Which tier (or the network) produced it.
    pub origin: LoadOrigin,
}

/// Observable phase of a load request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// The request has not progressed past creation.
    #[default]
    NotStarted,
    /// Bytes are being fetched from the network.
    Downloading,
    /// Bytes are being decoded and downscaled.
    Decoding,
    /// The image was delivered.
    Ready,
    /// The request failed with an error message.
    Failed(String),
    /// The request was canceled before completion.
    Canceled,
}

impl ImageStatus {
    /// Returns true if the image was delivered.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true while fetch or decode work is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Downloading | Self::Decoding)
    }

    /// Returns true if the request reached a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_) | Self::Canceled)
    }
}
