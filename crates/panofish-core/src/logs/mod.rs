use serde::{Deserialize, Serialize};

use crate::errors::{PanoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchStage {
    Matching,
    GeometrySolve,
    Warp,
    SeamAndBlend,
    Done,
}

/// Where the calibration behind a delivered frame came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CalibrationSource {
    Fresh,
    Averaged { source_frames: Vec<u64> },
    Fallback { from_frame: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameLogEntry {
    pub frame_index: u64,
    /// `None` for dropped frames.
    pub source: Option<CalibrationSource>,
    pub stages: Vec<StitchStage>,
    pub retained_area_fraction: f64,
    pub non_black_ratio: f64,
    pub needs_review: bool,
    pub output_size: Option<(u32, u32)>,
    /// Wall time spent composing the delivered frame.
    #[serde(default)]
    pub elapsed_ms: f64,
}

impl FrameLogEntry {
    pub fn dropped(frame_index: u64) -> Self {
        Self {
            frame_index,
            source: None,
            stages: Vec::new(),
            retained_area_fraction: 0.0,
            non_black_ratio: 0.0,
            needs_review: false,
            output_size: None,
            elapsed_ms: 0.0,
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.source.is_none()
    }
}

/// Per-frame outcomes in frame order.
#[derive(Debug, Default, Clone)]
pub struct StitchLog {
    entries: Vec<FrameLogEntry>,
}

impl StitchLog {
    pub fn push(&mut self, entry: FrameLogEntry) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if entry.frame_index <= last.frame_index {
                return Err(PanoError::PreconditionViolation(format!(
                    "log entry for frame {} after frame {}",
                    entry.frame_index, last.frame_index
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameLogEntry> {
        self.entries.iter()
    }

    pub fn dropped_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_dropped()).count()
    }

    pub fn review_count(&self) -> usize {
        self.entries.iter().filter(|e| e.needs_review).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_enforces_increasing_frames() {
        let mut log = StitchLog::default();
        log.push(FrameLogEntry::dropped(0)).unwrap();
        log.push(FrameLogEntry {
            source: Some(CalibrationSource::Fresh),
            needs_review: true,
            ..FrameLogEntry::dropped(1)
        })
        .unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped_count(), 1);
        assert_eq!(log.review_count(), 1);
        assert!(log.push(FrameLogEntry::dropped(1)).is_err());
    }
}
