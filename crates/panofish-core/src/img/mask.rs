use serde::{Deserialize, Serialize};

use crate::img::PixelRect;

/// Fraction of each image searched for features where neighbours overlap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskRatio {
    pub width: f64,
    pub height: f64,
}

impl Default for MaskRatio {
    fn default() -> Self {
        Self {
            width: 0.25,
            height: 0.8,
        }
    }
}

impl MaskRatio {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Feature search regions for image `index` of `total` ordered views.
///
/// The first view only overlaps on its right edge, the last on its left edge,
/// interior views on both. A lone view is searched entirely.
pub fn feature_rois(
    width: u32,
    height: u32,
    index: usize,
    total: usize,
    ratio: MaskRatio,
) -> Vec<PixelRect> {
    if total <= 1 {
        return vec![PixelRect::full(width, height)];
    }
    let strip_w = ((width as f64 * ratio.width.clamp(0.0, 1.0)) as u32).max(1).min(width);
    let strip_h = ((height as f64 * ratio.height.clamp(0.0, 1.0)) as u32).max(1).min(height);

    let left = PixelRect::new(0, 0, strip_w, strip_h);
    let right = PixelRect::new(width - strip_w, 0, strip_w, strip_h);

    let mut rois = Vec::with_capacity(2);
    if index > 0 {
        rois.push(left);
    }
    if index + 1 < total {
        rois.push(right);
    }
    rois
}
