use panofish_core::logs::{CalibrationSource, FrameLogEntry, StitchStage};

use crate::output::{FrameStat, Metadata, ProcessingOutput, Summary};
use crate::types::SessionData;

/// Collects statistics during processing
pub struct AnalysisCollector {
    session: SessionData,
    frame_stats: Vec<FrameStat>,
}

impl AnalysisCollector {
    pub fn new(session: SessionData) -> Self {
        Self {
            session,
            frame_stats: Vec::new(),
        }
    }

    pub fn add_frame(&mut self, report: &FrameLogEntry, output_file: Option<String>) {
        let (calibration, source_frames) = match &report.source {
            None => ("dropped", Vec::new()),
            Some(CalibrationSource::Fresh) => ("fresh", Vec::new()),
            Some(CalibrationSource::Averaged { source_frames }) => ("averaged", source_frames.clone()),
            Some(CalibrationSource::Fallback { from_frame }) => ("fallback", vec![*from_frame]),
        };
        self.frame_stats.push(FrameStat {
            frame: report.frame_index,
            calibration: calibration.to_string(),
            source_frames,
            stages: report.stages.iter().map(|s| stage_name(*s).to_string()).collect(),
            width: report.output_size.map(|s| s.0),
            height: report.output_size.map(|s| s.1),
            retained_area_fraction: report.retained_area_fraction,
            non_black_ratio: report.non_black_ratio,
            needs_review: report.needs_review,
            processing_ms: report.elapsed_ms,
            output_file,
        });
    }

    pub fn frame_count(&self) -> usize {
        self.frame_stats.len()
    }

    pub fn finalize(self, output_dir: String, policy: String) -> ProcessingOutput {
        let AnalysisCollector {
            session,
            frame_stats,
        } = self;

        let delivered: Vec<&FrameStat> = frame_stats
            .iter()
            .filter(|s| s.calibration != "dropped")
            .collect();
        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let summary = Summary {
            total_frames: frame_stats.len(),
            delivered_frames: delivered.len(),
            dropped_frames: frame_stats.len() - delivered.len(),
            review_frames: frame_stats.iter().filter(|s| s.needs_review).count(),
            average_processing_ms: mean(delivered.iter().map(|s| s.processing_ms).collect()),
            average_non_black_ratio: mean(delivered.iter().map(|s| s.non_black_ratio).collect()),
            average_retained_area: mean(
                delivered.iter().map(|s| s.retained_area_fraction).collect(),
            ),
        };

        ProcessingOutput {
            metadata: Metadata {
                session_name: session.name.clone(),
                camera_dirs: session
                    .camera_dirs
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
                output_dir,
                processing_timestamp: chrono::Utc::now().to_rfc3339(),
                camera_count: session.camera_count(),
                policy,
                frame_count: frame_stats.len(),
            },
            frame_stats,
            summary,
        }
    }
}

fn stage_name(stage: StitchStage) -> &'static str {
    match stage {
        StitchStage::Matching => "matching",
        StitchStage::GeometrySolve => "geometry_solve",
        StitchStage::Warp => "warp",
        StitchStage::SeamAndBlend => "seam_and_blend",
        StitchStage::Done => "done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn summary_ignores_dropped_frames_in_averages() {
        let mut collector =
            AnalysisCollector::new(SessionData::new(vec![PathBuf::from("rig/cam0")]));
        collector.add_frame(
            &FrameLogEntry {
                source: Some(CalibrationSource::Averaged {
                    source_frames: vec![0, 1],
                }),
                stages: vec![StitchStage::Warp, StitchStage::Done],
                non_black_ratio: 0.9,
                retained_area_fraction: 0.8,
                output_size: Some((640, 320)),
                elapsed_ms: 12.0,
                ..FrameLogEntry::dropped(0)
            },
            Some("frame_000000.png".to_string()),
        );
        collector.add_frame(&FrameLogEntry::dropped(1), None);

        let output = collector.finalize("out".to_string(), "one_sided".to_string());
        assert_eq!(output.metadata.session_name, "rig");
        assert_eq!(output.summary.total_frames, 2);
        assert_eq!(output.summary.dropped_frames, 1);
        assert_eq!(output.summary.average_non_black_ratio, 0.9);
        assert_eq!(output.frame_stats[0].stages, vec!["warp", "done"]);
        assert_eq!(output.frame_stats[1].calibration, "dropped");
    }
}
