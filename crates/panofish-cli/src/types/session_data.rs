use std::path::PathBuf;

/// One recorded rig session: an image directory per camera
#[derive(Debug, Clone)]
pub struct SessionData {
    pub camera_dirs: Vec<PathBuf>,
    /// Session name (derived from the first camera directory's parent)
    pub name: String,
}

impl SessionData {
    pub fn new(camera_dirs: Vec<PathBuf>) -> Self {
        let name = camera_dirs
            .first()
            .and_then(|dir| dir.parent().and_then(|p| p.file_name()).or(dir.file_name()))
            .and_then(|s| s.to_str())
            .unwrap_or("unnamed_session")
            .to_string();

        Self { camera_dirs, name }
    }

    pub fn camera_count(&self) -> usize {
        self.camera_dirs.len()
    }
}
