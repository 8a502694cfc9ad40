//! Image sources and cache key derivation.

use std::sync::Arc;

use image::DynamicImage;

/// Abstract origin of an image.
#[derive(Debug, Clone)]
pub enum Source {
    /// Remote image addressed by URL.
    Url(String),
    /// Already-decoded raster supplied by the caller.
    Raster(Arc<DynamicImage>),
    /// Bundled resource addressed by numeric id.
    Resource(u32),
}

impl Source {
    /// Creates a URL source from any string-like input.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }
}

/// Deterministic string identifier derived from a [`Source`].
///
/// Doubles as the on-disk filename for the persistent cache tier, so URL
/// keys must not contain path separators or the scheme colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives the key for a source.
    ///
    /// URL keys replace `/` and `:` with `_` so the key is a valid filename.
    /// Raster keys stringify the bitmap handle; resource keys stringify the
    /// id. Identical handles always derive identical keys.
    #[must_use]
    pub fn from_source(source: &Source) -> Self {
        match source {
            Source::Url(url) => Self(url.replace(['/', ':'], "_")),
            Source::Raster(image) => Self(format!("{:p}", Arc::as_ptr(image))),
            Source::Resource(id) => Self(id.to_string()),
        }
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_key_is_deterministic() {
        let source = Source::url("https://example.com/images/photo.png");
        let key1 = CacheKey::from_source(&source);
        let key2 = CacheKey::from_source(&source);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_url_key_is_filename_safe() {
        let source = Source::url("https://example.com/a/b/c.png");
        let key = CacheKey::from_source(&source);
        assert!(!key.as_str().contains('/'));
        assert!(!key.as_str().contains(':'));
    }

    #[test]
    fn test_raster_key_stable_for_same_handle() {
        let image = Arc::new(DynamicImage::new_rgb8(4, 4));
        let source = Source::Raster(image);
        let key1 = CacheKey::from_source(&source);
        let key2 = CacheKey::from_source(&source);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_resource_key_is_id() {
        let key = CacheKey::from_source(&Source::Resource(42));
        assert_eq!(key.as_str(), "42");
    }
}
