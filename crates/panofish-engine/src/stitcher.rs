use image::RgbImage;
use log::{debug, warn};
use panofish_core::border::{BorderStrategy, reclaim_borders};
use panofish_core::calib::{
    CalibrationSnapshot, ColumnRange, FocalLimits, MIN_FOCAL_AGREEMENT, MIN_RELATIVE_FOCAL_RATIO,
};
use panofish_core::contracts::{VisionBackend, WarpedView};
use panofish_core::img::{MaskRatio, PixelRect, feature_rois, non_black_ratio, resize_exact};
use panofish_core::logs::StitchStage;
use panofish_core::{PanoError, Result};

use crate::warp::warp_cylindrical;

/// Knobs of a single stitch pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchParams {
    pub mask_ratio: MaskRatio,
    /// Feather width as a percentage of `sqrt(canvas area)`; 0 is a hard cut.
    pub blend_strength: f32,
    /// Resolution (megapixels) features are searched at.
    pub work_megapix: f64,
    pub min_focal_agreement: f64,
    /// Solves whose focals moved less than this relative amount are refused.
    pub min_relative_focal_ratio: f64,
    pub border: BorderStrategy,
}

impl Default for StitchParams {
    fn default() -> Self {
        Self {
            mask_ratio: MaskRatio::default(),
            blend_strength: 5.0,
            work_megapix: 0.8,
            min_focal_agreement: MIN_FOCAL_AGREEMENT,
            min_relative_focal_ratio: MIN_RELATIVE_FOCAL_RATIO,
            border: BorderStrategy::DoubleScan,
        }
    }
}

impl StitchParams {
    pub fn focal_limits(&self) -> FocalLimits {
        FocalLimits {
            min_agreement: self.min_focal_agreement,
            min_relative_ratio: self.min_relative_focal_ratio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassOutput {
    pub image: RgbImage,
    pub snapshot: CalibrationSnapshot,
    pub stages: Vec<StitchStage>,
    pub crop_bounds: PixelRect,
    pub retained_area_fraction: f64,
    pub needs_review: bool,
}

#[derive(Debug, Clone)]
pub enum PassOutcome {
    Composed(PassOutput),
    /// The solve was refused; the snapshot is marked rejected.
    Degenerate { snapshot: CalibrationSnapshot },
}

/// One stitch pass over ordered views.
///
/// With `reuse` the Matching and GeometrySolve stages are skipped and the stored
/// projector states drive the warp.
pub fn compose(
    backend: &dyn VisionBackend,
    params: &StitchParams,
    images: &[RgbImage],
    reuse: Option<&CalibrationSnapshot>,
) -> Result<PassOutcome> {
    if images.is_empty() || images.iter().any(|i| i.width() == 0 || i.height() == 0) {
        return Err(PanoError::PreconditionViolation(
            "stitching needs at least one non-empty image".to_string(),
        ));
    }

    let working_size = match reuse {
        Some(snapshot) => snapshot.working_size,
        None => images
            .iter()
            .map(|i| i.dimensions())
            .min_by_key(|&(w, h)| w as u64 * h as u64)
            .unwrap_or((0, 0)),
    };
    let working: Vec<RgbImage> = images
        .iter()
        .map(|i| resize_exact(i, working_size.0, working_size.1))
        .collect();

    let mut stages = Vec::with_capacity(5);
    let mut snapshot = match reuse {
        Some(snapshot) => {
            if snapshot.image_count != images.len() {
                return Err(PanoError::SnapshotMismatch {
                    left: snapshot.image_count,
                    right: images.len(),
                });
            }
            debug!("reusing calibration of {} merged solves", snapshot.merged_count);
            snapshot.clone()
        }
        None => {
            stages.push(StitchStage::Matching);
            stages.push(StitchStage::GeometrySolve);
            let mut snapshot = solve(backend, params, &working, working_size)?;
            snapshot.focal_limits = params.focal_limits();
            if let Some(reason) = snapshot.focal_rejection() {
                warn!("rejecting solve: {reason}");
                snapshot.rejected = true;
                return Ok(PassOutcome::Degenerate { snapshot });
            }
            snapshot
        }
    };

    stages.push(StitchStage::Warp);
    let mut views = working
        .iter()
        .zip(&snapshot.warp_states)
        .map(|(image, state)| warp_cylindrical(image, state))
        .collect::<Result<Vec<_>>>()?;

    stages.push(StitchStage::SeamAndBlend);
    backend.find_seams(&mut views)?;
    let panorama = backend.blend(&views, params.blend_strength)?;

    let crop = reclaim_borders(&panorama, params.border)?;
    snapshot.composition_ranges = composition_ranges(&views, crop.bounds);
    snapshot.non_black_ratio = non_black_ratio(&crop.image);
    stages.push(StitchStage::Done);

    Ok(PassOutcome::Composed(PassOutput {
        image: crop.image,
        snapshot,
        stages,
        crop_bounds: crop.bounds,
        retained_area_fraction: crop.retained_area_fraction,
        needs_review: crop.needs_review,
    }))
}

/// Matching and GeometrySolve at feature resolution, rescaled to the working size.
fn solve(
    backend: &dyn VisionBackend,
    params: &StitchParams,
    working: &[RgbImage],
    working_size: (u32, u32),
) -> Result<CalibrationSnapshot> {
    let area = working_size.0 as f64 * working_size.1 as f64;
    let feature_scale = (params.work_megapix * 1e6 / area).sqrt().min(1.0);
    let feature_w = ((working_size.0 as f64 * feature_scale).round() as u32).max(1);
    let feature_h = ((working_size.1 as f64 * feature_scale).round() as u32).max(1);

    let total = working.len();
    let features = working
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let small = resize_exact(image, feature_w, feature_h);
            let rois = feature_rois(feature_w, feature_h, index, total, params.mask_ratio);
            backend.find_features(&small, index, &rois)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let matches = features
        .windows(2)
        .map(|pair| backend.match_features(&pair[0], &pair[1]))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let cameras = backend.estimate_cameras(&features, &matches)?;
    let cameras = backend.refine_cameras(&features, &matches, cameras)?;
    if cameras.len() != total {
        return Err(PanoError::DegenerateCalibration(format!(
            "backend returned {} cameras for {total} images",
            cameras.len()
        )));
    }

    let cameras: Vec<_> = cameras.iter().map(|c| c.scaled(1.0 / feature_scale)).collect();
    let mut snapshot = CalibrationSnapshot::from_cameras(params.mask_ratio, working_size, cameras, 0.0)?;
    let warp_scale = snapshot.average_focal_length();
    snapshot = CalibrationSnapshot::from_cameras(
        params.mask_ratio,
        working_size,
        snapshot.cameras,
        warp_scale,
    )?;
    debug!(
        "solved {total} cameras, warp scale {warp_scale:.1}, focal agreement {:.3}",
        snapshot.focal_agreement()
    );
    Ok(snapshot)
}

/// Output columns attributed to each view, left to right, split at overlap midpoints
/// and expressed relative to the crop.
pub fn composition_ranges(views: &[WarpedView], crop: PixelRect) -> Vec<ColumnRange> {
    let Some(origin) = views.iter().map(|v| v.corner.0).min() else {
        return Vec::new();
    };
    let mut spans: Vec<(i64, i64)> = views
        .iter()
        .map(|v| {
            let start = (v.corner.0 - origin) as i64;
            (start, start + v.image.width() as i64)
        })
        .collect();
    spans.sort();

    for i in 1..spans.len() {
        let (prev_start, prev_end) = spans[i - 1];
        let (start, end) = spans[i];
        if start < prev_end {
            let seam = ((start + prev_end) / 2).clamp(prev_start, end.max(prev_start));
            spans[i - 1].1 = seam;
            spans[i].0 = seam;
            spans[i].1 = end.max(seam);
        }
    }

    let left = crop.x as i64;
    let right = crop.right() as i64;
    spans
        .into_iter()
        .map(|(start, end)| {
            let start = start.clamp(left, right) - left;
            let end = end.clamp(left, right) - left;
            ColumnRange::new(start as u32, end.max(start) as u32)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use panofish_core::calib::ranges_disjoint_and_ordered;

    fn view(corner: i32, width: u32) -> WarpedView {
        WarpedView::new(RgbImage::new(width, 4), GrayImage::new(width, 4), (corner, 0))
    }

    #[test]
    fn ranges_split_overlaps_and_follow_crop() {
        let views = vec![view(-10, 100), view(60, 100)];
        let ranges = composition_ranges(&views, PixelRect::new(5, 0, 160, 4));

        assert_eq!(ranges, vec![ColumnRange::new(0, 80), ColumnRange::new(80, 160)]);
        assert!(ranges_disjoint_and_ordered(&ranges));
    }

    #[test]
    fn reversed_views_still_produce_ordered_ranges() {
        let views = vec![view(300, 200), view(150, 200), view(0, 200)];
        let ranges = composition_ranges(&views, PixelRect::new(0, 0, 500, 4));
        assert_eq!(ranges.len(), 3);
        assert!(ranges_disjoint_and_ordered(&ranges));
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(500));
    }
}
