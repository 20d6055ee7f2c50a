pub mod image_sequence;

pub use image_sequence::*;

use image::RgbImage;

use crate::errors::Result;

/// Synchronised frames from every camera of a rig.
pub trait FrameSource {
    fn camera_count(&self) -> usize;

    /// Frames left, when the source knows it.
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// One frame per camera, or `None` once any camera runs out.
    fn next_frames(&mut self) -> Result<Option<Vec<RgbImage>>>;
}
