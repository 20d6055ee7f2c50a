use image::{GrayImage, RgbImage};
use thiserror::Error;

use crate::calib::CameraParams;
use crate::img::PixelRect;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub response: f32,
}

/// Keypoints and descriptors found in one source view.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeatures {
    pub image_index: usize,
    pub image_size: (u32, u32),
    pub keypoints: Vec<Keypoint>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<Vec<f32>>,
}

impl ImageFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureMatch {
    /// Index into the source view's keypoints.
    pub query: usize,
    /// Index into the destination view's keypoints.
    pub train: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseMatches {
    pub src_image: usize,
    pub dst_image: usize,
    pub matches: Vec<FeatureMatch>,
    pub confidence: f64,
}

/// A source view projected onto the shared cylinder.
#[derive(Debug, Clone)]
pub struct WarpedView {
    pub image: RgbImage,
    /// Pixels that received content from the source view.
    pub mask: GrayImage,
    /// Pixels this view owns after seam finding; starts equal to `mask`.
    pub seam_mask: GrayImage,
    /// Top-left corner of the view on the output canvas.
    pub corner: (i32, i32),
}

impl WarpedView {
    pub fn new(image: RgbImage, mask: GrayImage, corner: (i32, i32)) -> Self {
        Self {
            image,
            seam_mask: mask.clone(),
            mask,
            corner,
        }
    }

    pub fn right(&self) -> i32 {
        self.corner.0 + self.image.width() as i32
    }

    pub fn bottom(&self) -> i32 {
        self.corner.1 + self.image.height() as i32
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("image {image_index} yielded only {found} features")]
    NotEnoughFeatures { image_index: usize, found: usize },

    #[error("images {src} and {dst} do not overlap")]
    NoOverlap { src: usize, dst: usize },

    #[error("camera estimation failed: {0}")]
    Estimation(String),

    #[error("blending failed: {0}")]
    Blend(String),
}

/// Feature, geometry, seam and blend operations the compositor delegates.
pub trait VisionBackend: Send + Sync {
    fn find_features(
        &self,
        image: &RgbImage,
        image_index: usize,
        rois: &[PixelRect],
    ) -> Result<ImageFeatures, BackendError>;

    fn match_features(
        &self,
        src: &ImageFeatures,
        dst: &ImageFeatures,
    ) -> Result<PairwiseMatches, BackendError>;

    /// Initial camera guess from consecutive pairwise matches.
    fn estimate_cameras(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
    ) -> Result<Vec<CameraParams>, BackendError>;

    fn refine_cameras(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
        cameras: Vec<CameraParams>,
    ) -> Result<Vec<CameraParams>, BackendError>;

    /// Narrows each view's seam mask so overlapping views split ownership.
    fn find_seams(&self, views: &mut [WarpedView]) -> Result<(), BackendError>;

    /// Composites the views; `strength` 0 disables feathering.
    fn blend(&self, views: &[WarpedView], strength: f32) -> Result<RgbImage, BackendError>;
}
