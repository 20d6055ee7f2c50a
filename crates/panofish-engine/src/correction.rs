use image::RgbImage;
use log::{debug, info};
use panofish_core::img::FisheyeCircle;
use panofish_core::math::{DistanceMapping, Interpolation, Orientation, ProjectionMap};
use panofish_core::{PanoError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CorrectionMode {
    #[default]
    Equirectangular,
    /// Virtual pinhole camera with the given focal length in pixels.
    Perspective { focal_length: f64 },
}

/// How each raw camera frame is turned into a flat view before stitching.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionConfig {
    /// Field of view mapped onto the output, radians.
    pub field_of_view: f64,
    /// Physical lens field of view when it is wider than `field_of_view`.
    pub lens_field_of_view: Option<f64>,
    pub mapping: DistanceMapping,
    pub orientation: Orientation,
    pub interpolation: Interpolation,
    pub mode: CorrectionMode,
    /// Output size; defaults to the fisheye square.
    pub output_size: Option<(u32, u32)>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            field_of_view: 95f64.to_radians(),
            lens_field_of_view: None,
            mapping: DistanceMapping::Equidistant,
            orientation: Orientation::identity(),
            interpolation: Interpolation::Bilinear,
            mode: CorrectionMode::Equirectangular,
            output_size: None,
        }
    }
}

/// Crops the fisheye circle out of every camera frame and reprojects it.
///
/// Built once per stream by [`FrameCorrector::calibrate`]; the circle and lookup
/// tables never change afterwards.
#[derive(Debug)]
pub struct FrameCorrector {
    config: CorrectionConfig,
    frame_size: (u32, u32),
    circle: FisheyeCircle,
    shrink: Option<ProjectionMap>,
    map: ProjectionMap,
}

impl FrameCorrector {
    /// Locates the circle for `frame_size` frames and builds the lookup tables.
    pub fn calibrate(config: CorrectionConfig, frame_size: (u32, u32)) -> Result<Self> {
        let circle = FisheyeCircle::from_frame_size(frame_size.0, frame_size.1)?;
        let side = circle.square(frame_size.0, frame_size.1).width;
        let params = circle
            .params(config.field_of_view, config.mapping)
            .with_orientation(config.orientation)
            .with_interpolation(config.interpolation);

        let shrink = match config.lens_field_of_view {
            Some(lens_fov) if lens_fov > config.field_of_view => {
                Some(ProjectionMap::fisheye_shrink((side, side), &params, lens_fov)?)
            }
            _ => None,
        };

        let output = config.output_size.unwrap_or((side, side));
        let map = match config.mode {
            CorrectionMode::Equirectangular => {
                ProjectionMap::fisheye_to_equirectangular((side, side), output, &params)?
            }
            CorrectionMode::Perspective { focal_length } => {
                ProjectionMap::perspective((side, side), output, &params, focal_length)?
            }
        };
        info!(
            "fisheye circle radius {} in {}x{} frames, {:?} output {}x{} ({:.1}% mapped)",
            circle.radius,
            frame_size.0,
            frame_size.1,
            config.mode,
            output.0,
            output.1,
            map.coverage() * 100.0
        );
        Ok(Self {
            config,
            frame_size,
            circle,
            shrink,
            map,
        })
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn circle(&self) -> FisheyeCircle {
        self.circle
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Corrects one frame per camera; cameras run in parallel.
    pub fn correct(&self, frames: &[RgbImage]) -> Result<Vec<RgbImage>> {
        if frames.is_empty() {
            return Err(PanoError::PreconditionViolation(
                "no camera frames to correct".to_string(),
            ));
        }
        if let Some(frame) = frames.iter().find(|f| f.dimensions() != self.frame_size) {
            return Err(PanoError::PreconditionViolation(format!(
                "camera frame {:?} differs from calibrated size {:?}",
                frame.dimensions(),
                self.frame_size
            )));
        }

        let interpolation = self.config.interpolation;
        frames
            .par_iter()
            .map(|frame| -> Result<RgbImage> {
                let mut square = self.circle.crop_square(frame)?;
                if let Some(shrink) = &self.shrink {
                    let mut shrunk = RgbImage::new(square.width(), square.height());
                    shrink.apply(&square, &mut shrunk, interpolation)?;
                    square = shrunk;
                }
                let (w, h) = self.map.size();
                let mut out = RgbImage::new(w, h);
                self.map.apply(&square, &mut out, interpolation)?;
                debug!("corrected {}x{} frame to {w}x{h}", frame.width(), frame.height());
                Ok(out)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn lit_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([180, 90, 30]))
    }

    #[test]
    fn equirect_output_matches_the_circle_square() {
        let corrector = FrameCorrector::calibrate(CorrectionConfig::default(), (160, 100)).unwrap();
        assert_eq!(corrector.circle().radius, 50);

        let out = corrector
            .correct(&[lit_frame(160, 100), lit_frame(160, 100)])
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].dimensions(), (100, 100));
        assert_eq!(*out[0].get_pixel(50, 50), Rgb([180, 90, 30]));
    }

    #[test]
    fn perspective_mode_uses_requested_size() {
        let config = CorrectionConfig {
            mode: CorrectionMode::Perspective { focal_length: 40.0 },
            output_size: Some((64, 48)),
            ..CorrectionConfig::default()
        };
        let corrector = FrameCorrector::calibrate(config, (100, 100)).unwrap();
        let out = corrector.correct(&[lit_frame(100, 100)]).unwrap();
        assert_eq!(out[0].dimensions(), (64, 48));
        assert_eq!(*out[0].get_pixel(32, 24), Rgb([180, 90, 30]));
    }

    #[test]
    fn frames_must_match_the_calibrated_size() {
        let corrector = FrameCorrector::calibrate(CorrectionConfig::default(), (120, 100)).unwrap();
        assert!(matches!(
            corrector.correct(&[lit_frame(140, 100)]),
            Err(PanoError::PreconditionViolation(_))
        ));
        assert!(corrector.correct(&[]).is_err());
        assert_eq!(corrector.correct(&[lit_frame(120, 100)]).unwrap().len(), 1);
    }

    #[test]
    fn calibration_rejects_unusable_frames() {
        assert!(FrameCorrector::calibrate(CorrectionConfig::default(), (80, 100)).is_err());
        assert!(FrameCorrector::calibrate(CorrectionConfig::default(), (0, 0)).is_err());
    }

    #[test]
    fn wider_lens_builds_a_shrink_map() {
        let config = CorrectionConfig {
            lens_field_of_view: Some(120f64.to_radians()),
            ..CorrectionConfig::default()
        };
        let corrector = FrameCorrector::calibrate(config, (100, 100)).unwrap();
        let out = corrector.correct(&[lit_frame(100, 100)]).unwrap();
        assert_eq!(out[0].dimensions(), (100, 100));
        assert_eq!(*out[0].get_pixel(50, 50), Rgb([180, 90, 30]));
    }
}
