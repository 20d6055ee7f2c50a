use log::warn;
use nalgebra::Matrix3;

use crate::errors::{PanoError, Result};
use crate::img::MaskRatio;
use crate::math::rotation::orthonormalize;
use crate::math::utils::median;

/// Focal lengths of one solve must agree within this ratio (min / max).
pub const MIN_FOCAL_AGREEMENT: f64 = 0.8;

/// Relative focal difference under which the estimator is taken to have never
/// moved the focals off their initial guess.
pub const MIN_RELATIVE_FOCAL_RATIO: f64 = 1e-4;

/// Bounds on the focal lengths of one solve; outside them the solve is degenerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalLimits {
    /// Lower bound on min / max focal.
    pub min_agreement: f64,
    /// Lower bound on the largest `|f_i - f_0| / f_0`.
    pub min_relative_ratio: f64,
}

impl Default for FocalLimits {
    fn default() -> Self {
        Self {
            min_agreement: MIN_FOCAL_AGREEMENT,
            min_relative_ratio: MIN_RELATIVE_FOCAL_RATIO,
        }
    }
}

/// Rotation and pinhole intrinsics of one source view.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParams {
    pub rotation: Matrix3<f64>,
    pub focal: f64,
    pub aspect: f64,
    pub ppx: f64,
    pub ppy: f64,
}

impl CameraParams {
    pub fn new(rotation: Matrix3<f64>, focal: f64, ppx: f64, ppy: f64) -> Self {
        Self {
            rotation,
            focal,
            aspect: 1.0,
            ppx,
            ppy,
        }
    }

    pub fn intrinsics(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal,
            0.0,
            self.ppx,
            0.0,
            self.focal * self.aspect,
            self.ppy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Same camera seen through an image resized by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            rotation: self.rotation,
            focal: self.focal * factor,
            aspect: self.aspect,
            ppx: self.ppx * factor,
            ppy: self.ppy * factor,
        }
    }

    fn weighted(&self, weight: f64, other: &Self, other_weight: f64) -> Self {
        let total = weight + other_weight;
        let mix = |a: f64, b: f64| (a * weight + b * other_weight) / total;
        Self {
            rotation: orthonormalize(&((self.rotation * weight + other.rotation * other_weight) / total)),
            focal: mix(self.focal, other.focal),
            aspect: mix(self.aspect, other.aspect),
            ppx: mix(self.ppx, other.ppx),
            ppy: mix(self.ppy, other.ppy),
        }
    }
}

/// Per-view projector matrices that let the warp run without re-solving.
#[derive(Debug, Clone, PartialEq)]
pub struct WarpProjectorState {
    pub scale: f64,
    /// R·K⁻¹, image plane to world ray.
    pub r_kinv: Matrix3<f64>,
    /// K·Rᵀ, world ray back to the image plane.
    pub k_rinv: Matrix3<f64>,
}

impl WarpProjectorState {
    pub fn for_camera(camera: &CameraParams, scale: f64) -> Result<Self> {
        let k = camera.intrinsics();
        let k_inv = k.try_inverse().ok_or_else(|| {
            PanoError::DegenerateCalibration(format!("singular intrinsics (focal {})", camera.focal))
        })?;
        Ok(Self {
            scale,
            r_kinv: camera.rotation * k_inv,
            k_rinv: k * camera.rotation.transpose(),
        })
    }

    /// Element-wise weighted average; the matrices are not re-derived from a camera.
    pub fn weighted(&self, wa: f64, other: &Self, wb: f64) -> Self {
        let total = wa + wb;
        Self {
            scale: (self.scale * wa + other.scale * wb) / total,
            r_kinv: (self.r_kinv * wa + other.r_kinv * wb) / total,
            k_rinv: (self.k_rinv * wa + other.k_rinv * wb) / total,
        }
    }
}

/// Half-open column interval `[start, end)` of the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnRange {
    pub start: u32,
    pub end: u32,
}

impl ColumnRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// True when every range ends at or before the next one starts.
pub fn ranges_disjoint_and_ordered(ranges: &[ColumnRange]) -> bool {
    ranges.iter().all(|r| r.start <= r.end)
        && ranges.windows(2).all(|pair| pair[0].end <= pair[1].start)
}

/// One geometric solution for N source views and the layout of the frame it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSnapshot {
    pub image_count: usize,
    pub mask_ratio: MaskRatio,
    pub working_size: (u32, u32),
    pub cameras: Vec<CameraParams>,
    pub warp_scale: f64,
    pub warp_states: Vec<WarpProjectorState>,
    pub composition_ranges: Vec<ColumnRange>,
    pub non_black_ratio: f64,
    /// How many solves were averaged into this snapshot.
    pub merged_count: u32,
    /// Set when the failure policy refused the solve.
    pub rejected: bool,
    pub focal_limits: FocalLimits,
}

impl CalibrationSnapshot {
    pub fn from_cameras(
        mask_ratio: MaskRatio,
        working_size: (u32, u32),
        cameras: Vec<CameraParams>,
        warp_scale: f64,
    ) -> Result<Self> {
        let warp_states = cameras
            .iter()
            .map(|camera| WarpProjectorState::for_camera(camera, warp_scale))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            image_count: cameras.len(),
            mask_ratio,
            working_size,
            cameras,
            warp_scale,
            warp_states,
            composition_ranges: Vec::new(),
            non_black_ratio: 0.0,
            merged_count: 1,
            rejected: false,
            focal_limits: FocalLimits::default(),
        })
    }

    pub fn focal_lengths(&self) -> Vec<f64> {
        self.cameras.iter().map(|c| c.focal).collect()
    }

    /// Median focal length; the mean of the two middle values for even counts.
    pub fn average_focal_length(&self) -> f64 {
        median(&self.focal_lengths()).unwrap_or(0.0)
    }

    pub fn is_usable(&self) -> bool {
        self.image_count > 0
    }

    /// Ratio of the smallest to the largest focal length.
    pub fn focal_agreement(&self) -> f64 {
        let focals = self.focal_lengths();
        let min = focals.iter().copied().fold(f64::INFINITY, f64::min);
        let max = focals.iter().copied().fold(0.0, f64::max);
        if focals.is_empty() || max <= 0.0 || !min.is_finite() {
            return 0.0;
        }
        min / max
    }

    /// Largest `|f_i - f_0| / f_0`; `None` for fewer than two cameras.
    pub fn relative_focal_ratio(&self) -> Option<f64> {
        let (first, rest) = self.cameras.split_first()?;
        if rest.is_empty() || first.focal <= 0.0 {
            return None;
        }
        Some(
            rest.iter()
                .map(|c| ((c.focal - first.focal) / first.focal).abs())
                .fold(0.0, f64::max),
        )
    }

    /// Why the focal lengths make this solve unusable, if they do.
    pub fn focal_rejection(&self) -> Option<String> {
        if self
            .cameras
            .iter()
            .any(|c| !c.focal.is_finite() || c.focal <= 0.0)
        {
            return Some(format!("invalid focals {:?}", self.focal_lengths()));
        }
        let agreement = self.focal_agreement();
        if agreement < self.focal_limits.min_agreement {
            return Some(format!(
                "focal agreement {agreement:.3} below {:.3} (focals {:?})",
                self.focal_limits.min_agreement,
                self.focal_lengths()
            ));
        }
        if let Some(ratio) = self.relative_focal_ratio()
            && ratio < self.focal_limits.min_relative_ratio
        {
            return Some(format!(
                "relative focal ratio {ratio:.2e} below {:.2e}, focals left at the initial guess",
                self.focal_limits.min_relative_ratio
            ));
        }
        None
    }

    pub fn is_degenerate(&self) -> bool {
        self.rejected || self.cameras.is_empty() || self.focal_rejection().is_some()
    }

    pub fn quality_score(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.non_black_ratio.clamp(0.0, 1.0) * self.focal_agreement()
    }

    /// Weighted running average of two solves for the same rig.
    pub fn merge(&self, other: &Self) -> Result<Self> {
        if self.image_count != other.image_count || self.cameras.len() != other.cameras.len() {
            return Err(PanoError::SnapshotMismatch {
                left: self.image_count,
                right: other.image_count,
            });
        }
        if self.working_size != other.working_size {
            warn!(
                "merging snapshots with working sizes {:?} and {:?}",
                self.working_size, other.working_size
            );
        }

        let wa = self.merged_count.max(1) as f64;
        let wb = other.merged_count.max(1) as f64;
        let mix = |a: f64, b: f64| (a * wa + b * wb) / (wa + wb);

        let cameras: Vec<CameraParams> = self
            .cameras
            .iter()
            .zip(&other.cameras)
            .map(|(a, b)| a.weighted(wa, b, wb))
            .collect();
        let warp_scale = mix(self.warp_scale, other.warp_scale);

        let composition_ranges = if self.composition_ranges.len() == other.composition_ranges.len() {
            self.composition_ranges
                .iter()
                .zip(&other.composition_ranges)
                .map(|(a, b)| {
                    ColumnRange::new(
                        mix(a.start as f64, b.start as f64).round() as u32,
                        mix(a.end as f64, b.end as f64).round() as u32,
                    )
                })
                .collect()
        } else if self.composition_ranges.is_empty() {
            other.composition_ranges.clone()
        } else {
            self.composition_ranges.clone()
        };

        let mut merged = Self::from_cameras(self.mask_ratio, self.working_size, cameras, warp_scale)?;
        if self.warp_states.len() == other.warp_states.len() {
            merged.warp_states = self
                .warp_states
                .iter()
                .zip(&other.warp_states)
                .map(|(a, b)| a.weighted(wa, b, wb))
                .collect();
        }
        merged.composition_ranges = composition_ranges;
        merged.non_black_ratio = mix(self.non_black_ratio, other.non_black_ratio);
        merged.merged_count = self.merged_count.max(1) + other.merged_count.max(1);
        merged.rejected = self.rejected || other.rejected;
        merged.focal_limits = self.focal_limits;
        Ok(merged)
    }
}

/// Operations the temporal cache needs from whatever a frame's solve produced.
pub trait Calibration: Clone {
    fn merge(&self, other: &Self) -> Result<Self>;
    fn quality_score(&self) -> f64;
    fn is_degenerate(&self) -> bool;
    fn is_usable(&self) -> bool;
}

impl Calibration for CalibrationSnapshot {
    fn merge(&self, other: &Self) -> Result<Self> {
        CalibrationSnapshot::merge(self, other)
    }

    fn quality_score(&self) -> f64 {
        CalibrationSnapshot::quality_score(self)
    }

    fn is_degenerate(&self) -> bool {
        CalibrationSnapshot::is_degenerate(self)
    }

    fn is_usable(&self) -> bool {
        CalibrationSnapshot::is_usable(self)
    }
}

/// Snapshots of every stitch pass a policy runs for one frame, in pass order.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotGroup {
    pub passes: Vec<CalibrationSnapshot>,
}

impl SnapshotGroup {
    pub fn new(passes: Vec<CalibrationSnapshot>) -> Self {
        Self { passes }
    }

    pub fn single(snapshot: CalibrationSnapshot) -> Self {
        Self::new(vec![snapshot])
    }

    pub fn pass(&self, index: usize) -> Option<&CalibrationSnapshot> {
        self.passes.get(index)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// The snapshot that produced the delivered frame.
    pub fn final_pass(&self) -> Option<&CalibrationSnapshot> {
        self.passes.last()
    }
}

impl Calibration for SnapshotGroup {
    fn merge(&self, other: &Self) -> Result<Self> {
        if self.passes.len() != other.passes.len() {
            return Err(PanoError::SnapshotMismatch {
                left: self.passes.len(),
                right: other.passes.len(),
            });
        }
        let passes = self
            .passes
            .iter()
            .zip(&other.passes)
            .map(|(a, b)| a.merge(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { passes })
    }

    fn quality_score(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.passes.iter().map(|p| p.quality_score()).sum::<f64>() / self.passes.len() as f64
    }

    fn is_degenerate(&self) -> bool {
        self.passes.is_empty() || self.passes.iter().any(|p| p.is_degenerate())
    }

    fn is_usable(&self) -> bool {
        !self.passes.is_empty() && self.passes.iter().all(|p| p.is_usable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::rotation::rotation_about_y;
    use approx::assert_relative_eq;

    fn snapshot(focals: &[f64], yaw_step: f64, ratio: f64) -> CalibrationSnapshot {
        let cameras = focals
            .iter()
            .enumerate()
            .map(|(i, &f)| CameraParams::new(rotation_about_y(i as f64 * yaw_step), f, 200.0, 150.0))
            .collect();
        let mut snap =
            CalibrationSnapshot::from_cameras(MaskRatio::default(), (400, 300), cameras, 300.0)
                .unwrap();
        snap.non_black_ratio = ratio;
        snap.composition_ranges = (0..focals.len() as u32)
            .map(|i| ColumnRange::new(i * 100, i * 100 + 100))
            .collect();
        snap
    }

    #[test]
    fn average_focal_is_median() {
        let snap = snapshot(&[300.0, 310.0, 320.0, 400.0], 0.5, 0.9);
        assert_relative_eq!(snap.average_focal_length(), 315.0, epsilon = 1e-12);
        assert!(snap.is_usable());
    }

    #[test]
    fn warp_state_inverts_camera() {
        let snap = snapshot(&[300.0], 0.0, 1.0);
        let state = &snap.warp_states[0];
        assert_relative_eq!(state.k_rinv * state.r_kinv, Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn quality_blends_coverage_and_focal_agreement() {
        let snap = snapshot(&[300.0, 330.0], 0.5, 0.9);
        assert!(!snap.is_degenerate());
        assert_relative_eq!(snap.quality_score(), 0.9 * 300.0 / 330.0, epsilon = 1e-12);
    }

    #[test]
    fn merge_is_weighted_by_history() {
        let mut a = snapshot(&[300.0, 300.0], 0.4, 0.8);
        a.merged_count = 3;
        let b = snapshot(&[340.0, 340.0], 0.4, 1.0);

        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.merged_count, 4);
        assert_relative_eq!(merged.cameras[0].focal, 310.0, epsilon = 1e-9);
        assert_relative_eq!(merged.non_black_ratio, 0.85, epsilon = 1e-9);
        assert_relative_eq!(merged.cameras[1].rotation, rotation_about_y(0.4), epsilon = 1e-6);
        assert!(ranges_disjoint_and_ordered(&merged.composition_ranges));
    }

    #[test]
    fn merge_averages_warp_states_element_wise() {
        let mut a = snapshot(&[300.0, 303.0], 0.4, 0.8);
        a.merged_count = 3;
        let mut b = snapshot(&[340.0, 346.0], 0.2, 1.0);
        b.warp_states[1].scale = 340.0;

        let merged = a.merge(&b).unwrap();
        for (i, state) in merged.warp_states.iter().enumerate() {
            let (sa, sb) = (&a.warp_states[i], &b.warp_states[i]);
            assert_relative_eq!(state.r_kinv, (sa.r_kinv * 3.0 + sb.r_kinv) / 4.0, epsilon = 1e-12);
            assert_relative_eq!(state.k_rinv, (sa.k_rinv * 3.0 + sb.k_rinv) / 4.0, epsilon = 1e-9);
        }
        assert_relative_eq!(merged.warp_states[0].scale, 300.0, epsilon = 1e-12);
        assert_relative_eq!(merged.warp_states[1].scale, 310.0, epsilon = 1e-12);
    }

    #[test]
    fn merge_rejects_different_rigs() {
        let a = snapshot(&[300.0, 300.0], 0.4, 0.8);
        let b = snapshot(&[300.0, 300.0, 300.0], 0.4, 0.8);
        assert!(matches!(
            a.merge(&b),
            Err(PanoError::SnapshotMismatch { left: 2, right: 3 })
        ));
    }

    #[test]
    fn unmoved_focals_are_degenerate() {
        let snap = snapshot(&[300.0, 300.0], 0.4, 0.9);
        assert_eq!(snap.relative_focal_ratio(), Some(0.0));
        assert!(snap.is_degenerate());
        assert_eq!(snap.quality_score(), 0.0);

        let moved = snapshot(&[300.0, 300.3], 0.4, 0.9);
        assert!(!moved.is_degenerate());

        let mut lenient = snap.clone();
        lenient.focal_limits.min_relative_ratio = 0.0;
        assert!(!lenient.is_degenerate());
    }

    #[test]
    fn single_camera_skips_the_relative_check() {
        let snap = snapshot(&[300.0], 0.0, 0.9);
        assert_eq!(snap.relative_focal_ratio(), None);
        assert!(!snap.is_degenerate());
    }

    #[test]
    fn group_is_degenerate_when_any_pass_is() {
        let good = snapshot(&[300.0, 303.0], 0.4, 0.8);
        let mut bad = good.clone();
        bad.rejected = true;

        let group = SnapshotGroup::new(vec![good.clone(), bad]);
        assert!(Calibration::is_degenerate(&group));
        assert_eq!(Calibration::quality_score(&group), 0.0);

        let group = SnapshotGroup::new(vec![good.clone(), good]);
        assert_relative_eq!(
            Calibration::quality_score(&group),
            0.8 * 300.0 / 303.0,
            epsilon = 1e-12
        );
    }
}
