use std::collections::{BTreeMap, VecDeque};

use image::RgbImage;
use log::{debug, warn};

use crate::calib::Calibration;
use crate::errors::{PanoError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    /// Maximum span of frame indices kept in the window.
    pub window_size: u64,
    /// Number of top-scoring entries averaged by a query.
    pub best_k: usize,
    /// Frames past the newest entry that may still reuse the window.
    pub reuse_horizon: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            best_k: 7,
            reuse_horizon: 10,
        }
    }
}

#[derive(Debug, Clone)]
struct WindowEntry<C> {
    frame_index: u64,
    calibration: C,
    score: f64,
}

/// Result of a cache query: the merged calibration and the frames it came from.
#[derive(Debug, Clone)]
pub struct AveragedCalibration<C> {
    pub calibration: C,
    pub source_frames: Vec<u64>,
}

/// Sliding window of recent per-frame calibrations plus the frames waiting on them.
///
/// Frame indices must be recorded in non-decreasing order. Eviction keeps
/// `end_index - start_index <= window_size`.
#[derive(Debug)]
pub struct TemporalWindow<C: Calibration> {
    config: WindowConfig,
    entries: VecDeque<WindowEntry<C>>,
    start_index: u64,
    end_index: u64,
    pending_sources: BTreeMap<u64, Vec<RgbImage>>,
    completed: BTreeMap<u64, RgbImage>,
}

impl<C: Calibration> TemporalWindow<C> {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            entries: VecDeque::with_capacity(config.window_size as usize + 1),
            start_index: 0,
            end_index: 0,
            pending_sources: BTreeMap::new(),
            completed: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn start_index(&self) -> u64 {
        self.start_index
    }

    pub fn end_index(&self) -> u64 {
        self.end_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once the recorded span reaches the configured window size.
    pub fn is_full(&self) -> bool {
        !self.entries.is_empty() && self.end_index - self.start_index >= self.config.window_size
    }

    /// Whether a query for `frame_index` can be answered from this window.
    pub fn covers(&self, frame_index: u64) -> bool {
        !self.entries.is_empty()
            && frame_index >= self.start_index
            && frame_index < self.end_index + self.config.reuse_horizon
    }

    pub fn record(&mut self, frame_index: u64, calibration: C) -> Result<()> {
        if let Some(last) = self.entries.back() {
            if frame_index <= last.frame_index {
                return Err(PanoError::PreconditionViolation(format!(
                    "frame {frame_index} recorded after frame {}",
                    last.frame_index
                )));
            }
        }

        let score = if calibration.is_degenerate() || !calibration.is_usable() {
            debug!("frame {frame_index}: calibration stored with zero score");
            0.0
        } else {
            calibration.quality_score()
        };

        if self.entries.is_empty() {
            self.start_index = frame_index;
        }
        self.entries.push_back(WindowEntry {
            frame_index,
            calibration,
            score,
        });
        self.end_index = frame_index + 1;

        while self.end_index - self.start_index > self.config.window_size {
            self.entries.pop_front();
            self.start_index = self
                .entries
                .front()
                .map(|e| e.frame_index)
                .unwrap_or(self.end_index);
        }
        Ok(())
    }

    /// Averages up to `best_k` of the highest-scoring usable entries.
    pub fn query(&self, frame_index: u64) -> Option<AveragedCalibration<C>> {
        if !self.covers(frame_index) {
            return None;
        }

        let mut ranked: Vec<&WindowEntry<C>> = self.entries.iter().filter(|e| e.score > 0.0).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.config.best_k);

        let mut merged: Option<C> = None;
        let mut source_frames = Vec::with_capacity(ranked.len());
        for entry in ranked {
            let next = match &merged {
                None => Ok(entry.calibration.clone()),
                Some(current) => current.merge(&entry.calibration),
            };
            match next {
                Ok(calibration) => {
                    merged = Some(calibration);
                    source_frames.push(entry.frame_index);
                }
                Err(err) => warn!("skipping frame {} in average: {err}", entry.frame_index),
            }
        }

        source_frames.sort_unstable();
        merged.map(|calibration| AveragedCalibration {
            calibration,
            source_frames,
        })
    }

    /// Drops every recorded calibration; staged frames are kept.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.start_index = self.end_index;
    }

    pub fn buffer_source(&mut self, frame_index: u64, sources: Vec<RgbImage>) {
        if self.pending_sources.insert(frame_index, sources).is_some() {
            warn!("frame {frame_index}: replaced previously buffered sources");
        }
    }

    pub fn take_source(&mut self, frame_index: u64) -> Result<Vec<RgbImage>> {
        self.pending_sources
            .remove(&frame_index)
            .ok_or(PanoError::MissingBufferedFrame { frame_index })
    }

    /// Frame indices still waiting for composition, in order.
    pub fn pending_frames(&self) -> Vec<u64> {
        self.pending_sources.keys().copied().collect()
    }

    pub fn buffer_result(&mut self, frame_index: u64, image: RgbImage) {
        self.completed.insert(frame_index, image);
    }

    /// Completed frames in order, holding back anything newer than a pending source.
    pub fn drain_results(&mut self) -> Vec<(u64, RgbImage)> {
        let ready = match self.pending_sources.keys().next() {
            Some(&oldest_pending) => {
                let held = self.completed.split_off(&oldest_pending);
                std::mem::replace(&mut self.completed, held)
            }
            None => std::mem::take(&mut self.completed),
        };
        ready.into_iter().collect()
    }

    /// Every completed frame regardless of pending sources.
    pub fn flush_results(&mut self) -> Vec<(u64, RgbImage)> {
        std::mem::take(&mut self.completed).into_iter().collect()
    }
}
