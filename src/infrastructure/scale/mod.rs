//! Bitmap downsampling toward a target viewport.
//!
//! Two reductions are composed here: an integer power-of-two sampling factor
//! that mirrors subsampled decoding (never undershoots the target box), and
//! an aspect-preserving fit into the box. Both collapse into a single
//! resample pass. Everything in this module is CPU-heavy and synchronous;
//! callers run it under `spawn_blocking`.

use image::{DynamicImage, GenericImageView, RgbaImage};
use tracing::trace;

use crate::domain::entities::Viewport;
use crate::domain::errors::LoadError;
use crate::infrastructure::cache::BufferPool;

/// Computes the integer subsampling factor for a native size and target box.
///
/// Starts at 1 and doubles while half the native size divided by the factor
/// still covers the target in both axes, so the reduced image never
/// undershoots the requested box.
#[must_use]
pub fn sample_factor(native_width: u32, native_height: u32, target: Viewport) -> u32 {
    let mut factor = 1;
    if native_width > target.width || native_height > target.height {
        let half_width = native_width / 2;
        let half_height = native_height / 2;
        while half_height / factor >= target.height && half_width / factor >= target.width {
            factor *= 2;
        }
    }
    factor
}

/// Computes the aspect-preserving dimensions that fit a native size into a
/// target box, or `None` when the native size already fits (or is empty).
///
/// The dimension whose ratio to the target is larger is pinned to its target
/// value; the other follows the native aspect ratio. Never upscales.
#[must_use]
pub fn fit_dimensions(
    native_width: u32,
    native_height: u32,
    target: Viewport,
) -> Option<(u32, u32)> {
    if native_width == 0 || native_height == 0 {
        return None;
    }
    if native_width <= target.width && native_height <= target.height {
        return None;
    }

    let width_ratio = f64::from(native_width) / f64::from(target.width);
    let height_ratio = f64::from(native_height) / f64::from(target.height);

    let (width, height) = if width_ratio >= height_ratio {
        let height = f64::from(native_height) * f64::from(target.width) / f64::from(native_width);
        (target.width, height.round() as u32)
    } else {
        let width = f64::from(native_width) * f64::from(target.height) / f64::from(native_height);
        (width.round() as u32, target.height)
    };

    Some((width.max(1), height.max(1)))
}

/// Downscales an already-decoded bitmap into the viewport.
///
/// Returns `None` when no work is needed (absent viewport, or the bitmap
/// already fits) so the caller can keep using its existing handle without a
/// copy.
#[must_use]
pub fn downscale_bitmap(
    image: &DynamicImage,
    viewport: Option<Viewport>,
    pool: Option<&BufferPool>,
) -> Option<DynamicImage> {
    let target = viewport?;
    let (width, height) = fit_dimensions(image.width(), image.height(), target)?;
    trace!(
        from_width = image.width(),
        from_height = image.height(),
        to_width = width,
        to_height = height,
        "Downscaling bitmap"
    );
    Some(resample(image, width, height, pool))
}

/// Decodes raw image bytes, reduced toward the viewport.
///
/// Without a viewport this is a single full decode. With one, the decoded
/// image is reduced by the subsampling factor and then fit into the box.
///
/// # Errors
/// Returns [`LoadError::Decode`] when the bytes are not a decodable image.
pub fn decode_downscaled(
    bytes: &[u8],
    viewport: Option<Viewport>,
    pool: Option<&BufferPool>,
) -> Result<DynamicImage, LoadError> {
    let decoded = image::load_from_memory(bytes).map_err(|e| LoadError::decode(e.to_string()))?;

    let Some(target) = viewport else {
        return Ok(decoded);
    };

    let factor = sample_factor(decoded.width(), decoded.height(), target);
    let sampled_width = (decoded.width() / factor).max(1);
    let sampled_height = (decoded.height() / factor).max(1);

    let (width, height) = fit_dimensions(sampled_width, sampled_height, target)
        .unwrap_or((sampled_width, sampled_height));

    if (width, height) == decoded.dimensions() {
        return Ok(decoded);
    }
    Ok(resample(&decoded, width, height, pool))
}

/// Unfiltered nearest-neighbor resample, writing into a pooled pixel buffer
/// when one of sufficient capacity is available.
fn resample(
    image: &DynamicImage,
    width: u32,
    height: u32,
    pool: Option<&BufferPool>,
) -> DynamicImage {
    let len = width as usize * height as usize * 4;
    let mut buf = pool.and_then(|p| p.take(len)).unwrap_or_default();
    buf.clear();
    buf.reserve(len);

    let (native_width, native_height) = image.dimensions();
    for y in 0..height {
        let src_y = (u64::from(y) * u64::from(native_height) / u64::from(height)) as u32;
        for x in 0..width {
            let src_x = (u64::from(x) * u64::from(native_width) / u64::from(width)) as u32;
            buf.extend_from_slice(&image.get_pixel(src_x, src_y).0);
        }
    }

    let out = RgbaImage::from_raw(width, height, buf)
        .unwrap_or_else(|| RgbaImage::new(width, height));
    DynamicImage::ImageRgba8(out)
}
