//! Blank-frame detection for sampled video frames.

use image::GenericImageView;

use crate::error::{CoverError, Result};

/// Frames darker than this average luma read as black.
const MIN_MEAN_LUMA: f32 = 18.0;
/// Frames with less spread than this read as a flat fill (fade, title card).
const MIN_LUMA_SPREAD: f32 = 8.0;
const GRID: u32 = 9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameStats {
    pub mean_luma: f32,
    pub luma_spread: f32,
}

impl FrameStats {
    pub fn is_blank(&self) -> bool {
        self.mean_luma < MIN_MEAN_LUMA || self.luma_spread < MIN_LUMA_SPREAD
    }

    /// Higher is more likely to be a useful cover.
    pub fn score(&self) -> f32 {
        self.luma_spread + self.mean_luma * 0.1
    }
}

/// Samples a grid of pixels (10% border excluded) and reports luma statistics.
pub fn frame_stats(data: &[u8]) -> Result<FrameStats> {
    let img = image::load_from_memory(data)
        .map_err(|e| CoverError::InvalidImage(format!("frame decode failed: {e}")))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(CoverError::InvalidImage("frame has no pixels".into()));
    }

    let border_x = width / 10;
    let border_y = height / 10;
    let sample_width = width - 2 * border_x;
    let sample_height = height - 2 * border_y;

    let mut lumas = Vec::with_capacity((GRID * GRID) as usize);
    for i in 0..GRID {
        for j in 0..GRID {
            let x = (border_x + i * sample_width.saturating_sub(1) / (GRID - 1)).min(width - 1);
            let y = (border_y + j * sample_height.saturating_sub(1) / (GRID - 1)).min(height - 1);
            let [r, g, b, _] = img.get_pixel(x, y).0;
            lumas.push(0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32);
        }
    }

    let count = lumas.len() as f32;
    let mean = lumas.iter().sum::<f32>() / count;
    let variance = lumas.iter().map(|l| (l - mean).powi(2)).sum::<f32>() / count;

    Ok(FrameStats {
        mean_luma: mean,
        luma_spread: variance.sqrt(),
    })
}
