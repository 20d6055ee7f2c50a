pub mod blend;
pub mod features;
pub mod geometry;

use image::RgbImage;
use log::debug;
use panofish_core::calib::CameraParams;
use panofish_core::contracts::{
    BackendError, ImageFeatures, PairwiseMatches, VisionBackend, WarpedView,
};
use panofish_core::img::PixelRect;

pub use blend::{feather_blend, vertical_midline_seams};
pub use geometry::focal_from_fov;

#[derive(Debug, Clone)]
pub struct FeatherBackendConfig {
    pub fast_threshold: u8,
    pub patch_radius: u32,
    pub max_features: usize,
    /// Lowe ratio on descriptor distances.
    pub match_ratio: f32,
    pub min_matches: usize,
    /// Horizontal field of view assumed for the first focal guess, in radians.
    pub field_of_view_hint: f64,
    /// Angular residual (radians) under which a match counts as an inlier.
    pub inlier_threshold: f64,
}

impl Default for FeatherBackendConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            patch_radius: 4,
            max_features: 500,
            match_ratio: 0.8,
            min_matches: 6,
            field_of_view_hint: 95f64.to_radians(),
            inlier_threshold: 0.02,
        }
    }
}

/// Pure-Rust vision backend for horizontally panned rigs.
///
/// Cameras are modelled as rotations about the vertical axis. They start from one
/// shared focal length, which refinement then adjusts per camera.
#[derive(Debug, Default)]
pub struct FeatherBackend {
    config: FeatherBackendConfig,
}

impl FeatherBackend {
    pub fn new(config: FeatherBackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatherBackendConfig {
        &self.config
    }
}

impl VisionBackend for FeatherBackend {
    fn find_features(
        &self,
        image: &RgbImage,
        image_index: usize,
        rois: &[PixelRect],
    ) -> Result<ImageFeatures, BackendError> {
        let features = features::detect_and_describe(
            image,
            image_index,
            rois,
            self.config.fast_threshold,
            self.config.patch_radius,
            self.config.max_features,
        );
        debug!("image {image_index}: {} features", features.len());
        if features.len() < self.config.min_matches {
            return Err(BackendError::NotEnoughFeatures {
                image_index,
                found: features.len(),
            });
        }
        Ok(features)
    }

    fn match_features(
        &self,
        src: &ImageFeatures,
        dst: &ImageFeatures,
    ) -> Result<PairwiseMatches, BackendError> {
        let matches = features::match_descriptors(src, dst, self.config.match_ratio);
        let candidates = src.len().min(dst.len()) as f64;
        let confidence = matches.len() as f64 / (8.0 + 0.3 * candidates);
        debug!(
            "images {}->{}: {} matches, confidence {confidence:.2}",
            src.image_index,
            dst.image_index,
            matches.len()
        );
        Ok(PairwiseMatches {
            src_image: src.image_index,
            dst_image: dst.image_index,
            matches,
            confidence,
        })
    }

    fn estimate_cameras(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
    ) -> Result<Vec<CameraParams>, BackendError> {
        let first = features
            .first()
            .ok_or_else(|| BackendError::Estimation("no images".to_string()))?;
        let focal = focal_from_fov(first.image_size.0, self.config.field_of_view_hint);
        let steps = geometry::estimate_yaw_steps(features, matches, focal, self.config.min_matches)?;
        Ok(geometry::cameras_from_yaw_steps(features, &steps, focal))
    }

    fn refine_cameras(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
        cameras: Vec<CameraParams>,
    ) -> Result<Vec<CameraParams>, BackendError> {
        if cameras.len() != features.len() {
            return Err(BackendError::Estimation(format!(
                "{} cameras for {} images",
                cameras.len(),
                features.len()
            )));
        }
        let Some(focal) = cameras.first().map(|c| c.focal) else {
            return Ok(cameras);
        };
        let steps = geometry::refine_yaw_steps(
            features,
            matches,
            &cameras,
            self.config.inlier_threshold,
            self.config.min_matches,
        );
        let focals = geometry::refine_focals(features, matches, &cameras, self.config.min_matches);
        let mut refined = geometry::cameras_from_yaw_steps(features, &steps, focal);
        for (camera, focal) in refined.iter_mut().zip(focals) {
            camera.focal = focal;
        }
        Ok(refined)
    }

    fn find_seams(&self, views: &mut [WarpedView]) -> Result<(), BackendError> {
        vertical_midline_seams(views);
        Ok(())
    }

    fn blend(&self, views: &[WarpedView], strength: f32) -> Result<RgbImage, BackendError> {
        feather_blend(views, strength)
    }
}
