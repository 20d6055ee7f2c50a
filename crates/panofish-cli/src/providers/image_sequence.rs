use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, info};

use crate::errors::{ProcessingError, Result};
use crate::providers::FrameSource;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Reads one directory of still images per camera, sorted by file name.
pub struct ImageSequenceSource {
    cameras: Vec<Vec<PathBuf>>,
    position: usize,
    step: usize,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dirs: &[P]) -> Result<Self> {
        let mut cameras = Vec::with_capacity(dirs.len());
        for (camera, dir) in dirs.iter().enumerate() {
            let dir = dir.as_ref();
            if !dir.is_dir() {
                return Err(ProcessingError::InputNotFound(dir.display().to_string()));
            }
            let files = list_images(dir)?;
            if files.is_empty() {
                return Err(ProcessingError::EmptyCamera {
                    camera,
                    dir: dir.display().to_string(),
                });
            }
            debug!("camera {camera}: {} images in {}", files.len(), dir.display());
            cameras.push(files);
        }
        if cameras.is_empty() {
            return Err(ProcessingError::NoFrames);
        }

        let shortest = cameras.iter().map(Vec::len).min().unwrap_or(0);
        info!("{} cameras, {shortest} synchronised frames", cameras.len());
        Ok(Self {
            cameras,
            position: 0,
            step: 1,
        })
    }

    /// Starts at `start` and reads every `skip + 1`-th frame.
    pub fn with_range(mut self, start: usize, skip: usize) -> Self {
        self.position = start;
        self.step = skip + 1;
        self
    }

    fn frame_count(&self) -> usize {
        self.cameras.iter().map(Vec::len).min().unwrap_or(0)
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl FrameSource for ImageSequenceSource {
    fn camera_count(&self) -> usize {
        self.cameras.len()
    }

    fn remaining(&self) -> Option<usize> {
        let left = self.frame_count().saturating_sub(self.position);
        Some(left.div_ceil(self.step))
    }

    fn next_frames(&mut self) -> Result<Option<Vec<RgbImage>>> {
        if self.position >= self.frame_count() {
            return Ok(None);
        }
        let frames = self
            .cameras
            .iter()
            .map(|files| -> Result<RgbImage> { Ok(image::open(&files[self.position])?.to_rgb8()) })
            .collect::<Result<Vec<_>>>()?;
        self.position += self.step;
        Ok(Some(frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, count: u8) {
        for i in 0..count {
            RgbImage::from_pixel(4, 4, Rgb([i, 0, 0]))
                .save(dir.join(format!("frame_{i:03}.png")))
                .unwrap();
        }
    }

    #[test]
    fn stops_when_shortest_camera_runs_out() {
        let root = tempfile::tempdir().unwrap();
        let cam0 = root.path().join("cam0");
        let cam1 = root.path().join("cam1");
        std::fs::create_dir_all(&cam0).unwrap();
        std::fs::create_dir_all(&cam1).unwrap();
        write_frames(&cam0, 3);
        write_frames(&cam1, 2);
        std::fs::write(cam0.join("notes.txt"), "ignored").unwrap();

        let mut source = ImageSequenceSource::open(&[&cam0, &cam1]).unwrap();
        assert_eq!(source.camera_count(), 2);
        assert_eq!(source.remaining(), Some(2));

        let first = source.next_frames().unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get_pixel(0, 0)[0], 0);
        let second = source.next_frames().unwrap().unwrap();
        assert_eq!(second[1].get_pixel(0, 0)[0], 1);
        assert!(source.next_frames().unwrap().is_none());
    }

    #[test]
    fn range_skips_frames() {
        let root = tempfile::tempdir().unwrap();
        write_frames(root.path(), 6);

        let mut source = ImageSequenceSource::open(&[root.path()])
            .unwrap()
            .with_range(1, 1);
        assert_eq!(source.remaining(), Some(3));
        let values: Vec<u8> = std::iter::from_fn(|| source.next_frames().unwrap())
            .map(|f| f[0].get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![1, 3, 5]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert!(matches!(
            ImageSequenceSource::open(&[missing]),
            Err(ProcessingError::InputNotFound(_))
        ));
    }
}
