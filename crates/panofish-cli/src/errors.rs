use panofish_core::PanoError;
use thiserror::Error;

/// Errors that abort a processing run
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Input directory not found: {0}")]
    InputNotFound(String),

    #[error("Camera {camera} has no readable images in {dir}")]
    EmptyCamera { camera: usize, dir: String },

    #[error("Failed to write frame {frame_index}: {message}")]
    FrameWrite { frame_index: u64, message: String },

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PanoError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("No frames found in input")]
    NoFrames,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ProcessingError>;
