pub mod correction;
pub mod double_side;
pub mod stitcher;
pub mod warp;

use std::collections::BTreeMap;
use std::time::Instant;

use image::RgbImage;
use log::{debug, error, info, warn};
use panofish_core::{PanoError, Result};
use panofish_core::cache::{AveragedCalibration, TemporalWindow, WindowConfig};
use panofish_core::calib::{Calibration, ColumnRange, SnapshotGroup};
use panofish_core::contracts::VisionBackend;
use panofish_core::logs::{CalibrationSource, FrameLogEntry, StitchLog, StitchStage};
use serde::{Deserialize, Serialize};

pub use correction::{CorrectionConfig, CorrectionMode, FrameCorrector};
pub use double_side::{GroupOutcome, compose_double_sided};
pub use stitcher::{PassOutcome, PassOutput, StitchParams, compose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchPolicy {
    #[default]
    OneSided,
    /// Forward-Backward-Forward recombination over four passes.
    DoubleSided,
}

/// Processing knobs of a panorama stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub policy: StitchPolicy,
    pub window: WindowConfig,
    pub stitch: StitchParams,
    pub correction: CorrectionConfig,
}

/// A frame leaving the engine; `image` is `None` when the frame was dropped.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_index: u64,
    pub image: Option<RgbImage>,
    pub report: FrameLogEntry,
    /// Output columns attributed to each view of the final pass.
    pub composition_ranges: Vec<ColumnRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Every frame is solved fresh and staged until the window fills.
    Warmup { start: u64 },
    /// Frames before `valid_until` reuse the averaged calibration.
    Steady { valid_until: u64 },
}

/// Streaming panorama composer.
///
/// Warm-up frames are solved individually and held back; once a full window of
/// solves exists they are all composed with the averaged calibration. Later
/// frames reuse that average until the reuse horizon runs out, which starts the
/// next warm-up. Output therefore lags input by up to one window.
pub struct PanoramaEngine {
    config: EngineConfig,
    backend: Box<dyn VisionBackend>,
    corrector: Option<FrameCorrector>,
    window: TemporalWindow<SnapshotGroup>,
    phase: Phase,
    averaged: Option<AveragedCalibration<SnapshotGroup>>,
    last_good: Option<(u64, SnapshotGroup)>,
    reports: BTreeMap<u64, (FrameLogEntry, Vec<ColumnRange>)>,
    log: StitchLog,
    next_frame: u64,
}

impl PanoramaEngine {
    pub fn new(config: EngineConfig, backend: Box<dyn VisionBackend>) -> Self {
        Self {
            config,
            backend,
            corrector: None,
            window: TemporalWindow::new(config.window),
            phase: Phase::Warmup { start: 0 },
            averaged: None,
            last_good: None,
            reports: BTreeMap::new(),
            log: StitchLog::default(),
            next_frame: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Outcomes of every frame delivered so far.
    pub fn log(&self) -> &StitchLog {
        &self.log
    }

    /// Index the next ingested frame will get.
    pub fn next_frame_index(&self) -> u64 {
        self.next_frame
    }

    /// Locates the fisheye circle for `frame_size` camera frames.
    ///
    /// Runs once before the first [`PanoramaEngine::ingest`]; calling it again
    /// replaces the calibration for every later frame.
    pub fn calibrate(&mut self, frame_size: (u32, u32)) -> Result<()> {
        self.corrector = Some(FrameCorrector::calibrate(self.config.correction, frame_size)?);
        Ok(())
    }

    pub fn corrector(&self) -> Option<&FrameCorrector> {
        self.corrector.as_ref()
    }

    /// Feeds one raw fisheye frame per camera. Frames arriving before
    /// [`PanoramaEngine::calibrate`] are dropped.
    pub fn ingest(&mut self, frames: Vec<RgbImage>) -> Vec<FrameOutput> {
        let frame_index = self.next_frame;
        let corrected = match &self.corrector {
            Some(corrector) => corrector.correct(&frames),
            None => Err(PanoError::PreconditionViolation(
                "fisheye correction is not calibrated".to_string(),
            )),
        };
        match corrected {
            Ok(views) => self.ingest_corrected(views),
            Err(err) => {
                error!("frame {frame_index}: correction failed: {err}");
                self.next_frame += 1;
                self.drop_frame(frame_index);
                self.collect_ready(false)
            }
        }
    }

    /// Feeds views that are already flat, skipping fisheye correction.
    pub fn ingest_corrected(&mut self, views: Vec<RgbImage>) -> Vec<FrameOutput> {
        let frame_index = self.next_frame;
        self.next_frame += 1;

        if let Phase::Steady { valid_until } = self.phase
            && frame_index >= valid_until
        {
            info!("frame {frame_index}: reuse horizon ended, warming up");
            self.phase = Phase::Warmup { start: frame_index };
            self.averaged = None;
        }

        match self.phase {
            Phase::Warmup { start } => {
                self.solve_fresh(frame_index, &views);
                self.window.buffer_source(frame_index, views);
                if frame_index + 1 - start >= self.config.window.window_size.max(1) {
                    self.compose_pending();
                    let valid_until = self.window.end_index() + self.config.window.reuse_horizon;
                    debug!("steady until frame {valid_until}");
                    self.phase = Phase::Steady { valid_until };
                }
            }
            Phase::Steady { .. } => {
                let averaged = self.averaged.take();
                self.compose_cached(frame_index, &views, averaged.as_ref());
                self.averaged = averaged;
            }
        }
        self.collect_ready(false)
    }

    /// Composes every staged frame and returns whatever is left.
    pub fn finish(&mut self) -> Vec<FrameOutput> {
        if !self.window.pending_frames().is_empty() {
            info!(
                "end of stream, composing {} staged frames",
                self.window.pending_frames().len()
            );
            self.compose_pending();
        }
        let outputs = self.collect_ready(true);
        info!(
            "stream done: {} frames, {} dropped, {} flagged for review",
            self.log.len(),
            self.log.dropped_count(),
            self.log.review_count()
        );
        outputs
    }

    fn run_policy(&self, views: &[RgbImage], reuse: Option<&SnapshotGroup>) -> Result<GroupOutcome> {
        match self.config.policy {
            StitchPolicy::OneSided => {
                let snapshot = match reuse {
                    Some(group) if group.len() != 1 => {
                        return Err(PanoError::SnapshotMismatch {
                            left: group.len(),
                            right: 1,
                        });
                    }
                    Some(group) => group.pass(0),
                    None => None,
                };
                Ok(
                    match compose(self.backend.as_ref(), &self.config.stitch, views, snapshot)? {
                        PassOutcome::Composed(output) => GroupOutcome::Composed {
                            group: SnapshotGroup::single(output.snapshot.clone()),
                            stages: output.stages.clone(),
                            output,
                        },
                        PassOutcome::Degenerate { snapshot } => GroupOutcome::Degenerate {
                            group: SnapshotGroup::single(snapshot),
                        },
                    },
                )
            }
            StitchPolicy::DoubleSided => {
                compose_double_sided(self.backend.as_ref(), &self.config.stitch, views, reuse)
            }
        }
    }

    /// Fresh solve recorded into the window; the composed image itself is not kept.
    fn solve_fresh(&mut self, frame_index: u64, views: &[RgbImage]) {
        let group = match self.run_policy(views, None) {
            Ok(GroupOutcome::Composed { group, .. }) => {
                debug!(
                    "frame {frame_index}: fresh solve scored {:.3}",
                    group.quality_score()
                );
                self.last_good = Some((frame_index, group.clone()));
                group
            }
            Ok(GroupOutcome::Degenerate { group }) => {
                warn!("frame {frame_index}: fresh solve rejected");
                group
            }
            Err(err) => {
                warn!("frame {frame_index}: fresh solve failed: {err}");
                return;
            }
        };
        if let Err(err) = self.window.record(frame_index, group) {
            warn!("frame {frame_index}: not recorded: {err}");
        }
    }

    fn compose_pending(&mut self) {
        let pending = self.window.pending_frames();
        let averaged = pending.first().and_then(|&f| self.window.query(f));
        match &averaged {
            Some(avg) => info!(
                "composing {} staged frames from the average of frames {:?}",
                pending.len(),
                avg.source_frames
            ),
            None => warn!("no usable calibration in window for {} staged frames", pending.len()),
        }

        for frame_index in pending {
            match self.window.take_source(frame_index) {
                Ok(views) => self.compose_cached(frame_index, &views, averaged.as_ref()),
                Err(err) => {
                    error!("frame {frame_index}: {err}");
                    self.drop_frame(frame_index);
                }
            }
        }
        self.averaged = averaged;
    }

    /// Composes with the averaged calibration, then the last good one, else drops.
    fn compose_cached(
        &mut self,
        frame_index: u64,
        views: &[RgbImage],
        averaged: Option<&AveragedCalibration<SnapshotGroup>>,
    ) {
        let started = Instant::now();
        if let Some(avg) = averaged {
            match self.run_policy(views, Some(&avg.calibration)) {
                Ok(GroupOutcome::Composed { output, group, stages }) => {
                    self.last_good = Some((frame_index, avg.calibration.clone()));
                    let source = CalibrationSource::Averaged {
                        source_frames: avg.source_frames.clone(),
                    };
                    self.deliver(frame_index, output, &group, stages, source, started);
                    return;
                }
                Ok(GroupOutcome::Degenerate { .. }) => {
                    warn!("frame {frame_index}: averaged calibration rejected")
                }
                Err(err) => warn!("frame {frame_index}: averaged calibration failed: {err}"),
            }
        }

        if let Some((from_frame, group)) = self.last_good.clone() {
            match self.run_policy(views, Some(&group)) {
                Ok(GroupOutcome::Composed { output, group, stages }) => {
                    warn!("frame {frame_index}: using calibration of frame {from_frame}");
                    let source = CalibrationSource::Fallback { from_frame };
                    self.deliver(frame_index, output, &group, stages, source, started);
                    return;
                }
                Ok(GroupOutcome::Degenerate { .. }) => {
                    warn!("frame {frame_index}: fallback calibration rejected")
                }
                Err(err) => warn!("frame {frame_index}: fallback calibration failed: {err}"),
            }
        }

        error!("frame {frame_index}: no usable calibration, dropping frame");
        self.drop_frame(frame_index);
    }

    fn drop_frame(&mut self, frame_index: u64) {
        self.reports
            .insert(frame_index, (FrameLogEntry::dropped(frame_index), Vec::new()));
    }

    fn deliver(
        &mut self,
        frame_index: u64,
        output: PassOutput,
        group: &SnapshotGroup,
        stages: Vec<StitchStage>,
        source: CalibrationSource,
        started: Instant,
    ) {
        let final_pass = group.final_pass().unwrap_or(&output.snapshot);
        let non_black_ratio = final_pass.non_black_ratio;
        let composition_ranges = final_pass.composition_ranges.clone();
        let report = FrameLogEntry {
            frame_index,
            source: Some(source),
            stages,
            retained_area_fraction: output.retained_area_fraction,
            non_black_ratio,
            needs_review: output.needs_review,
            output_size: Some(output.image.dimensions()),
            elapsed_ms: started.elapsed().as_secs_f64() * 1e3,
        };
        info!(
            "frame {frame_index}: {}x{} panorama, {:.1}% retained, {:.1}% lit",
            output.image.width(),
            output.image.height(),
            report.retained_area_fraction * 100.0,
            report.non_black_ratio * 100.0
        );
        self.reports
            .insert(frame_index, (report, composition_ranges));
        self.window.buffer_result(frame_index, output.image);
    }

    /// Finished frames in order, stopping before the oldest staged frame unless flushing.
    fn collect_ready(&mut self, flush: bool) -> Vec<FrameOutput> {
        let mut images: BTreeMap<u64, RgbImage> = if flush {
            self.window.flush_results()
        } else {
            self.window.drain_results()
        }
        .into_iter()
        .collect();

        let oldest_pending = if flush {
            None
        } else {
            self.window.pending_frames().first().copied()
        };
        let ready = match oldest_pending {
            Some(pending) => {
                let held = self.reports.split_off(&pending);
                std::mem::replace(&mut self.reports, held)
            }
            None => std::mem::take(&mut self.reports),
        };

        let mut outputs = Vec::with_capacity(ready.len());
        for (frame_index, (report, composition_ranges)) in ready {
            if let Err(err) = self.log.push(report.clone()) {
                warn!("frame {frame_index}: {err}");
            }
            outputs.push(FrameOutput {
                frame_index,
                image: images.remove(&frame_index),
                report,
                composition_ranges,
            });
        }
        for (frame_index, image) in images {
            // Results without a report go back until their report lands.
            self.window.buffer_result(frame_index, image);
        }
        outputs
    }
}
