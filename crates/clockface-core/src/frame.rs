//! RGB frame type, decoding, and per-region pixel statistics.

use thiserror::Error;

/// A decoded capture frame: packed 8-bit RGB, row-major.
#[derive(Debug, Clone, Default)]
pub struct RgbFrame {
    /// Pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an encoded image (PNG, JPEG, ...) into a packed RGB frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let rgb = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }
}

/// Sub-rectangle of a frame expressed as fractions of its dimensions.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Channel means and combined variance over one region.
#[derive(Debug, Clone, Copy)]
pub struct RegionStats {
    pub mean_r: f32,
    pub mean_g: f32,
    pub mean_b: f32,
    /// Mean squared deviation summed across all three channels.
    pub variance: f32,
    pub pixels: usize,
}

/// Compute channel statistics for a fractional region of the frame.
///
/// Region coordinates are floored to pixel offsets and clipped to the
/// frame; `None` when the region resolves to zero pixels.
pub fn region_stats(frame: &RgbFrame, region: &Region) -> Option<RegionStats> {
    if frame.width == 0 || frame.height == 0 {
        return None;
    }
    let x0 = (frame.width as f32 * region.x) as u32;
    let y0 = (frame.height as f32 * region.y) as u32;
    let w = (frame.width as f32 * region.width) as u32;
    let h = (frame.height as f32 * region.height) as u32;
    let x1 = (x0 + w).min(frame.width);
    let y1 = (y0 + h).min(frame.height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let mut sum_r = 0f64;
    let mut sum_g = 0f64;
    let mut sum_b = 0f64;
    let mut count = 0usize;
    for y in y0..y1 {
        for x in x0..x1 {
            let (r, g, b) = frame.pixel(x, y);
            sum_r += r as f64;
            sum_g += g as f64;
            sum_b += b as f64;
            count += 1;
        }
    }
    let mean_r = (sum_r / count as f64) as f32;
    let mean_g = (sum_g / count as f64) as f32;
    let mean_b = (sum_b / count as f64) as f32;

    // Second pass: squared deviation summed over channels.
    let mut sum_sq = 0f64;
    for y in y0..y1 {
        for x in x0..x1 {
            let (r, g, b) = frame.pixel(x, y);
            let dr = r as f64 - mean_r as f64;
            let dg = g as f64 - mean_g as f64;
            let db = b as f64 - mean_b as f64;
            sum_sq += dr * dr + dg * dg + db * db;
        }
    }

    Some(RegionStats {
        mean_r,
        mean_g,
        mean_b,
        variance: (sum_sq / count as f64) as f32,
        pixels: count,
    })
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
