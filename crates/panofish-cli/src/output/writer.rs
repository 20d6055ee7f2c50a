use std::path::{Path, PathBuf};

use image::RgbImage;
use log::debug;

use crate::errors::{ProcessingError, Result};

/// Destination for delivered panorama frames.
pub trait FrameWriter {
    /// Stores one frame and returns where it went.
    fn write(&mut self, frame_index: u64, image: &RgbImage) -> Result<PathBuf>;
}

/// Writes `frame_{index:06}.png` files into one directory.
pub struct PngSequenceWriter {
    dir: PathBuf,
    written: usize,
}

impl PngSequenceWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameWriter for PngSequenceWriter {
    fn write(&mut self, frame_index: u64, image: &RgbImage) -> Result<PathBuf> {
        let path = self.dir.join(format!("frame_{frame_index:06}.png"));
        image
            .save(&path)
            .map_err(|e| ProcessingError::FrameWrite {
                frame_index,
                message: e.to_string(),
            })?;
        self.written += 1;
        debug!("wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn frames_are_numbered_with_padding() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = PngSequenceWriter::new(dir.path().join("frames")).unwrap();
        let path = writer
            .write(42, &RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])))
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "frame_000042.png");
        assert_eq!(writer.written(), 1);
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*back.get_pixel(2, 1), Rgb([1, 2, 3]));
    }
}
