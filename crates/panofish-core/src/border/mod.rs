use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::region_labelling::{Connectivity, connected_components};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::{PanoError, Result};
use crate::img::PixelRect;
use crate::img::image_utils::{BLACK_TOLERANCE, almost_black, crop};

/// Crops retaining less than this share of the frame are flagged for review.
pub const REVIEW_THRESHOLD: f64 = 0.70;

/// Share of the width ignored on each side while scanning columns.
const SIDE_MARGIN: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorderStrategy {
    #[default]
    DoubleScan,
    ContourBound,
    /// Contour-bound, falling back to double-scan when the contour cannot be shrunk.
    ContourWithFallback,
}

#[derive(Debug, Clone)]
pub struct CropResult {
    pub image: RgbImage,
    pub bounds: PixelRect,
    pub retained_area_fraction: f64,
    pub needs_review: bool,
}

/// Crops the black border a stitched frame picks up from warping.
pub fn reclaim_borders(image: &RgbImage, strategy: BorderStrategy) -> Result<CropResult> {
    let bounds = match strategy {
        BorderStrategy::DoubleScan => double_scan_bounds(image)?,
        BorderStrategy::ContourBound => contour_bounds(image)?,
        BorderStrategy::ContourWithFallback => match contour_bounds(image) {
            Ok(bounds) => bounds,
            Err(err) => {
                warn!("contour crop failed ({err}), falling back to double scan");
                double_scan_bounds(image)?
            }
        },
    };

    let total = image.width() as u64 * image.height() as u64;
    let retained_area_fraction = bounds.area() as f64 / total as f64;
    let needs_review = retained_area_fraction < REVIEW_THRESHOLD;
    if needs_review {
        warn!(
            "border crop keeps only {:.1}% of a {}x{} frame",
            retained_area_fraction * 100.0,
            image.width(),
            image.height()
        );
    } else {
        debug!("border crop {bounds:?} keeps {:.1}%", retained_area_fraction * 100.0);
    }

    Ok(CropResult {
        image: crop(image, bounds)?,
        bounds,
        retained_area_fraction,
        needs_review,
    })
}

/// Row bounds from column scans, then column bounds from row scans inside them.
///
/// Lines with no content at all do not constrain the bounds.
pub fn double_scan_bounds(image: &RgbImage) -> Result<PixelRect> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(empty_frame());
    }
    let lit = |x: u32, y: u32| !almost_black(image.get_pixel(x, y));

    let mut margin = (width as f64 * SIDE_MARGIN) as u32;
    if 2 * margin >= width {
        margin = 0;
    }

    let mut top = 0;
    let mut bottom = height - 1;
    let mut found = false;
    for x in margin..width - margin {
        let Some(first) = (0..height).find(|&y| lit(x, y)) else {
            continue;
        };
        let last = (first..height).rev().find(|&y| lit(x, y)).unwrap_or(first);
        top = top.max(first);
        bottom = bottom.min(last);
        found = true;
    }
    if !found || top > bottom {
        return Err(PanoError::DegenerateCalibration(
            "no content rows found while scanning columns".to_string(),
        ));
    }

    let mut left = 0;
    let mut right = width - 1;
    found = false;
    for y in top..=bottom {
        let Some(first) = (0..width).find(|&x| lit(x, y)) else {
            continue;
        };
        let last = (first..width).rev().find(|&x| lit(x, y)).unwrap_or(first);
        left = left.max(first);
        right = right.min(last);
        found = true;
    }
    if !found || left > right {
        return Err(PanoError::DegenerateCalibration(
            "no content columns found while scanning rows".to_string(),
        ));
    }

    Ok(PixelRect::new(left, top, right - left + 1, bottom - top + 1))
}

/// Bounding box of the largest content contour, shrunk until no edge touches background.
pub fn contour_bounds(image: &RgbImage) -> Result<PixelRect> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(empty_frame());
    }

    let gray = image::imageops::grayscale(image);
    let threshold = BLACK_TOLERANCE as u8;
    let mask = GrayImage::from_fn(width, height, |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > threshold { 255 } else { 0 }])
    });

    let contours = find_contours::<i32>(&mask);
    let largest = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && !c.points.is_empty())
        .max_by_key(|c| c.points.len())
        .ok_or_else(|| PanoError::DegenerateCalibration("frame has no content contour".to_string()))?;

    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
    let seed = largest.points[0];
    let label = labels.get_pixel(seed.x as u32, seed.y as u32)[0];
    if label == 0 {
        return Err(PanoError::DegenerateCalibration(
            "contour does not start on content".to_string(),
        ));
    }
    let inside = |x: i64, y: i64| labels.get_pixel(x as u32, y as u32)[0] == label;

    let mut x0 = largest.points.iter().map(|p| p.x).min().unwrap_or(0) as i64;
    let mut x1 = largest.points.iter().map(|p| p.x).max().unwrap_or(0) as i64;
    let mut y0 = largest.points.iter().map(|p| p.y).min().unwrap_or(0) as i64;
    let mut y1 = largest.points.iter().map(|p| p.y).max().unwrap_or(0) as i64;

    loop {
        if x0 > x1 || y0 > y1 {
            return Err(PanoError::DegenerateCalibration(
                "contour bounds collapsed while shrinking".to_string(),
            ));
        }
        let top = (x0..=x1).filter(|&x| !inside(x, y0)).count();
        let bottom = (x0..=x1).filter(|&x| !inside(x, y1)).count();
        let left = (y0..=y1).filter(|&y| !inside(x0, y)).count();
        let right = (y0..=y1).filter(|&y| !inside(x1, y)).count();

        let worst = top.max(bottom).max(left).max(right);
        if worst == 0 {
            break;
        }
        if top == worst {
            y0 += 1;
        }
        if bottom == worst {
            y1 -= 1;
        }
        if left == worst {
            x0 += 1;
        }
        if right == worst {
            x1 -= 1;
        }
    }

    Ok(PixelRect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0 + 1) as u32,
        (y1 - y0 + 1) as u32,
    ))
}

fn empty_frame() -> PanoError {
    PanoError::PreconditionViolation("cannot crop an empty frame".to_string())
}
