use image::RgbImage;
use log::debug;

use crate::errors::{PanoError, Result};
use crate::img::PixelRect;
use crate::img::image_utils::crop;
use crate::math::projection::{DistanceMapping, ProjectionParams};

/// Location of the fisheye circle inside a raw camera frame.
///
/// The circle is assumed to touch the top and bottom of the frame and to be
/// centered horizontally. Estimated once per stream from the first frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FisheyeCircle {
    pub center_x: u32,
    pub center_y: u32,
    pub radius: u32,
}

impl FisheyeCircle {
    pub fn from_frame_size(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PanoError::PreconditionViolation(
                "frame must be non-empty".to_string(),
            ));
        }
        if width < height {
            return Err(PanoError::PreconditionViolation(format!(
                "frame {width}x{height} is narrower than tall, no horizontal circle fits"
            )));
        }
        // The square side is the frame height, so center and radius are both half of it.
        let radius = height / 2;
        let center_x = width / 2;
        debug!("fisheye circle at ({center_x}, {radius}) radius {radius} in {width}x{height}");
        Ok(Self {
            center_x,
            center_y: radius,
            radius,
        })
    }

    /// Square region around the circle, clipped to the frame.
    pub fn square(&self, width: u32, height: u32) -> PixelRect {
        let side = height.min(width);
        let x = self
            .center_x
            .saturating_sub(self.radius)
            .min(width - side);
        PixelRect::new(x, 0, side, side)
    }

    pub fn crop_square(&self, frame: &RgbImage) -> Result<RgbImage> {
        crop(frame, self.square(frame.width(), frame.height()))
    }

    /// Projection parameters for the cropped square.
    pub fn params(&self, field_of_view: f64, mapping: DistanceMapping) -> ProjectionParams {
        ProjectionParams::new((self.radius, self.radius), self.radius, field_of_view)
            .with_mapping(mapping)
    }
}
