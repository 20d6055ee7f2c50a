use thiserror::Error;

use crate::contracts::BackendError;

/// Errors raised by the projection and composition core.
#[derive(Debug, Error)]
pub enum PanoError {
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("degenerate calibration: {0}")]
    DegenerateCalibration(String),

    #[error("no buffered source frames for frame {frame_index}")]
    MissingBufferedFrame { frame_index: u64 },

    #[error("cannot merge snapshots of {left} and {right} images")]
    SnapshotMismatch { left: usize, right: usize },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl From<BackendError> for PanoError {
    fn from(err: BackendError) -> Self {
        PanoError::DegenerateCalibration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PanoError>;
