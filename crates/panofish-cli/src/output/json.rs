use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Complete processing output in JSON format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutput {
    pub metadata: Metadata,
    pub frame_stats: Vec<FrameStat>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub session_name: String,
    pub camera_dirs: Vec<String>,
    pub output_dir: String,
    pub processing_timestamp: String,
    pub camera_count: usize,
    pub policy: String,
    pub frame_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameStat {
    pub frame: u64,
    /// `fresh`, `averaged`, `fallback` or `dropped`
    pub calibration: String,
    pub source_frames: Vec<u64>,
    pub stages: Vec<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub retained_area_fraction: f64,
    pub non_black_ratio: f64,
    pub needs_review: bool,
    pub processing_ms: f64,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_frames: usize,
    pub delivered_frames: usize,
    pub dropped_frames: usize,
    pub review_frames: usize,
    pub average_processing_ms: f64,
    pub average_non_black_ratio: f64,
    pub average_retained_area: f64,
}

impl ProcessingOutput {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
