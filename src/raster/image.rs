//! Sampled image and array buffers.
//!
//! The producer attaches raw pixel payloads to each display list as a
//! map from opaque id to [`SampledBuffer`]. Color buffers arrive as
//! packed ARGB words; scalar buffers are mapped through a display
//! range `[low, high]` and an optional 256-entry color lookup table
//! before they become drawable bitmaps.

use hashbrown::HashMap;
use tiny_skia::{ColorU8, FilterQuality, Pixmap, PixmapPaint, Transform};

/// Raw pixel payload supplied alongside a command buffer.
#[derive(Clone, Debug)]
pub enum SampledBuffer {
    /// Packed `0xAARRGGBB` words, row-major, not premultiplied.
    Rgba {
        width: u32,
        height: u32,
        data: Vec<u32>,
    },
    /// Scalar samples, row-major; display range applied at draw time.
    Scalar {
        width: u32,
        height: u32,
        data: Vec<f32>,
    },
}

impl SampledBuffer {
    pub fn width(&self) -> u32 {
        match self {
            Self::Rgba { width, .. } | Self::Scalar { width, .. } => *width,
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Rgba { height, .. } | Self::Scalar { height, .. } => *height,
        }
    }
}

/// Per-update map from buffer id to payload. Colormap ids referenced
/// by data blits resolve against the same map: the first 256 pixels of
/// an `Rgba` entry form the lookup table.
pub type BufferMap = HashMap<u32, SampledBuffer>;

/// Converts a packed ARGB buffer into a premultiplied bitmap. `None`
/// when the dimensions are zero or the payload is short.
pub fn pixmap_from_rgba(width: u32, height: u32, data: &[u32]) -> Option<Pixmap> {
    let len = width as usize * height as usize;
    if data.len() < len {
        log::warn!(
            "rgba buffer too short: {} words for {width}x{height}",
            data.len()
        );
        return None;
    }
    let mut pixmap = Pixmap::new(width, height)?;
    for (dst, &word) in pixmap.pixels_mut().iter_mut().zip(data.iter().take(len)) {
        let a = (word >> 24) as u8;
        let r = (word >> 16) as u8;
        let g = (word >> 8) as u8;
        let b = word as u8;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

/// 256-entry lookup table applied to normalized scalar samples.
pub type Colormap = Vec<[u8; 3]>;

/// Interprets a buffer-map entry as a colormap: the leading 256 pixels
/// of an `Rgba` payload.
pub fn colormap_from_buffer(buffer: &SampledBuffer) -> Option<Colormap> {
    match buffer {
        SampledBuffer::Rgba { data, .. } if data.len() >= 256 => Some(
            data[..256]
                .iter()
                .map(|&w| [(w >> 16) as u8, (w >> 8) as u8, w as u8])
                .collect(),
        ),
        _ => None,
    }
}

/// Converts a scalar buffer into a bitmap by normalizing each sample
/// into `[low, high]` and indexing the colormap, or a grayscale ramp
/// when no colormap is given.
pub fn pixmap_from_scalar(
    width: u32,
    height: u32,
    data: &[f32],
    low: f32,
    high: f32,
    colormap: Option<&Colormap>,
) -> Option<Pixmap> {
    let len = width as usize * height as usize;
    if data.len() < len {
        log::warn!(
            "scalar buffer too short: {} samples for {width}x{height}",
            data.len()
        );
        return None;
    }
    let range = high - low;
    let scale = if range.abs() < f32::EPSILON {
        0.0
    } else {
        255.0 / range
    };
    let mut pixmap = Pixmap::new(width, height)?;
    for (dst, &v) in pixmap.pixels_mut().iter_mut().zip(data.iter().take(len)) {
        let index = (((v - low) * scale).clamp(0.0, 255.0)) as usize;
        let [r, g, b] = match colormap {
            Some(map) => map[index],
            None => {
                let g = index as u8;
                [g, g, g]
            }
        };
        *dst = ColorU8::from_rgba(r, g, b, 255).premultiply();
    }
    Some(pixmap)
}

/// Smooth-downscale threshold: only resample when the destination is
/// materially smaller than the source in either dimension.
const DOWNSCALE_THRESHOLD: f32 = 0.75;

/// Decides whether a blit should be pre-downscaled. Returns the target
/// size (aspect ratio preserved) or `None` when the bitmap should be
/// drawn at source resolution.
pub fn downscale_target(
    source_width: u32,
    source_height: u32,
    dest_width: f32,
    dest_height: f32,
) -> Option<(u32, u32)> {
    if source_width == 0 || source_height == 0 || dest_width <= 0.0 || dest_height <= 0.0 {
        return None;
    }
    let sx = dest_width / source_width as f32;
    let sy = dest_height / source_height as f32;
    if sx >= DOWNSCALE_THRESHOLD && sy >= DOWNSCALE_THRESHOLD {
        return None;
    }
    let scale = sx.min(sy);
    let w = ((source_width as f32 * scale).round() as u32).max(1);
    let h = ((source_height as f32 * scale).round() as u32).max(1);
    Some((w, h))
}

/// Bilinear resample into a new bitmap of the given size.
pub fn resample(source: &Pixmap, width: u32, height: u32) -> Option<Pixmap> {
    let mut target = Pixmap::new(width, height)?;
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    target.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &paint,
        Transform::from_scale(
            width as f32 / source.width() as f32,
            height as f32 / source.height() as f32,
        ),
        None,
    );
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_words_premultiply() {
        // half-transparent pure red
        let pm = pixmap_from_rgba(1, 1, &[0x80FF0000]).unwrap();
        let px = pm.pixels()[0];
        assert_eq!(px.alpha(), 0x80);
        assert!(px.red() <= 0x80);
        assert_eq!(px.blue(), 0);
    }

    #[test]
    fn short_rgba_buffer_is_rejected() {
        assert!(pixmap_from_rgba(2, 2, &[0, 0, 0]).is_none());
    }

    #[test]
    fn scalar_window_clamps_and_normalizes() {
        let pm = pixmap_from_scalar(3, 1, &[-1.0, 0.5, 2.0], 0.0, 1.0, None).unwrap();
        let px = pm.pixels();
        assert_eq!(px[0].red(), 0);
        assert_eq!(px[1].red(), 127);
        assert_eq!(px[2].red(), 255);
        // grayscale ramp
        assert_eq!(px[1].red(), px[1].green());
    }

    #[test]
    fn degenerate_window_maps_to_low_end() {
        let pm = pixmap_from_scalar(1, 1, &[5.0], 3.0, 3.0, None).unwrap();
        assert_eq!(pm.pixels()[0].red(), 0);
    }

    #[test]
    fn colormap_indexes_lookup_table() {
        let mut map: Colormap = vec![[0, 0, 0]; 256];
        map[255] = [10, 20, 30];
        let pm = pixmap_from_scalar(1, 1, &[1.0], 0.0, 1.0, Some(&map)).unwrap();
        let px = pm.pixels()[0];
        assert_eq!((px.red(), px.green(), px.blue()), (10, 20, 30));
    }

    #[test]
    fn colormap_from_rgba_entry() {
        let data = vec![0xFF102030u32; 256];
        let buf = SampledBuffer::Rgba {
            width: 256,
            height: 1,
            data,
        };
        let map = colormap_from_buffer(&buf).unwrap();
        assert_eq!(map[0], [0x10, 0x20, 0x30]);

        let short = SampledBuffer::Rgba {
            width: 4,
            height: 1,
            data: vec![0; 4],
        };
        assert!(colormap_from_buffer(&short).is_none());
    }

    #[test]
    fn downscale_only_below_threshold() {
        // 80% of source in both dimensions: draw at source resolution
        assert_eq!(downscale_target(100, 100, 80.0, 80.0), None);
        // half size in one dimension: resample, aspect preserved
        assert_eq!(downscale_target(100, 100, 50.0, 80.0), Some((50, 50)));
        assert_eq!(downscale_target(200, 100, 100.0, 50.0), Some((100, 50)));
    }

    #[test]
    fn resample_halves_dimensions() {
        let src = pixmap_from_rgba(4, 4, &[0xFFFFFFFF; 16]).unwrap();
        let out = resample(&src, 2, 2).unwrap();
        assert_eq!((out.width(), out.height()), (2, 2));
        assert_eq!(out.pixels()[0].alpha(), 255);
    }
}
