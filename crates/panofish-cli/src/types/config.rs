use std::path::{Path, PathBuf};

use panofish_backend::FeatherBackendConfig;
use panofish_core::border::BorderStrategy;
use panofish_core::cache::WindowConfig;
use panofish_core::img::MaskRatio;
use panofish_core::math::{DistanceMapping, Interpolation, Orientation};
use panofish_engine::{CorrectionConfig, CorrectionMode, EngineConfig, StitchParams, StitchPolicy};
use serde::{Deserialize, Serialize};

use crate::errors::{ProcessingError, Result};

/// Configuration for a panorama run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// One image directory per camera, left to right
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    /// Output directory for frames and the report
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// First frame index read from every camera
    #[serde(default)]
    pub start_frame: usize,
    /// Skip N frames between processed frames
    #[serde(default)]
    pub skip_frames: usize,
    /// Maximum number of frames to process
    pub max_frames: Option<usize>,
    #[serde(default)]
    pub policy: StitchPolicy,
    #[serde(default)]
    pub projection: ProjectionSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub stitch: StitchSettings,
    #[serde(default)]
    pub backend: BackendSettings,
    /// Write the per-frame JSON report next to the frames
    #[serde(default = "default_true")]
    pub write_report: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./panofish-output")
}

fn default_true() -> bool {
    true
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_dir: default_output_dir(),
            start_frame: 0,
            skip_frames: 0,
            max_frames: None,
            policy: StitchPolicy::default(),
            projection: ProjectionSettings::default(),
            window: WindowSettings::default(),
            stitch: StitchSettings::default(),
            backend: BackendSettings::default(),
            write_report: true,
        }
    }
}

/// Fisheye correction, angles in degrees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSettings {
    #[serde(default = "default_fov_deg")]
    pub field_of_view_deg: f64,
    /// Physical lens coverage when wider than `field_of_view_deg`
    pub lens_field_of_view_deg: Option<f64>,
    #[serde(default)]
    pub mapping: DistanceMapping,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub orientation_deg: Orientation,
    #[serde(default)]
    pub mode: CorrectionMode,
    /// Corrected view size as `[width, height]`; defaults to the fisheye square
    pub output_size: Option<(u32, u32)>,
}

fn default_fov_deg() -> f64 {
    95.0
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            field_of_view_deg: default_fov_deg(),
            lens_field_of_view_deg: None,
            mapping: DistanceMapping::default(),
            interpolation: Interpolation::default(),
            orientation_deg: Orientation::identity(),
            mode: CorrectionMode::default(),
            output_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSettings {
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_best_k")]
    pub best_k: usize,
    #[serde(default = "default_window_size")]
    pub reuse_horizon: u64,
}

fn default_window_size() -> u64 {
    10
}

fn default_best_k() -> usize {
    7
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            best_k: default_best_k(),
            reuse_horizon: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchSettings {
    #[serde(default = "default_blend_strength")]
    pub blend_strength: f32,
    #[serde(default = "default_work_megapix")]
    pub work_megapix: f64,
    #[serde(default = "default_focal_agreement")]
    pub min_focal_agreement: f64,
    #[serde(default = "default_relative_focal_ratio")]
    pub min_relative_focal_ratio: f64,
    #[serde(default)]
    pub mask_ratio: MaskRatio,
    #[serde(default)]
    pub border: BorderStrategy,
}

fn default_blend_strength() -> f32 {
    5.0
}

fn default_work_megapix() -> f64 {
    0.8
}

fn default_focal_agreement() -> f64 {
    panofish_core::calib::MIN_FOCAL_AGREEMENT
}

fn default_relative_focal_ratio() -> f64 {
    panofish_core::calib::MIN_RELATIVE_FOCAL_RATIO
}

impl Default for StitchSettings {
    fn default() -> Self {
        Self {
            blend_strength: default_blend_strength(),
            work_megapix: default_work_megapix(),
            min_focal_agreement: default_focal_agreement(),
            min_relative_focal_ratio: default_relative_focal_ratio(),
            mask_ratio: MaskRatio::default(),
            border: BorderStrategy::default(),
        }
    }
}

/// Tuning of the built-in feature backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_fast_threshold")]
    pub fast_threshold: u8,
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_match_ratio")]
    pub match_ratio: f32,
    #[serde(default = "default_min_matches")]
    pub min_matches: usize,
}

fn default_fast_threshold() -> u8 {
    20
}

fn default_max_features() -> usize {
    500
}

fn default_match_ratio() -> f32 {
    0.8
}

fn default_min_matches() -> usize {
    6
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            fast_threshold: default_fast_threshold(),
            max_features: default_max_features(),
            match_ratio: default_match_ratio(),
            min_matches: default_min_matches(),
        }
    }
}

impl ProcessingConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: ProcessingConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(ProcessingError::InvalidConfig(
                "at least one camera input directory is required".to_string(),
            ));
        }
        let fov = self.projection.field_of_view_deg;
        if !(fov > 0.0 && fov <= 360.0) {
            return Err(ProcessingError::InvalidConfig(format!(
                "field_of_view_deg {fov} must be in (0, 360]"
            )));
        }
        if let Some(lens) = self.projection.lens_field_of_view_deg
            && lens < fov
        {
            return Err(ProcessingError::InvalidConfig(format!(
                "lens_field_of_view_deg {lens} is narrower than field_of_view_deg {fov}"
            )));
        }
        if self.window.window_size == 0 || self.window.best_k == 0 {
            return Err(ProcessingError::InvalidConfig(
                "window_size and best_k must be positive".to_string(),
            ));
        }
        let ratio = self.stitch.mask_ratio;
        if !(ratio.width > 0.0 && ratio.width <= 1.0 && ratio.height > 0.0 && ratio.height <= 1.0) {
            return Err(ProcessingError::InvalidConfig(format!(
                "mask ratio {ratio:?} must lie in (0, 1]"
            )));
        }
        if self.stitch.min_relative_focal_ratio < 0.0 {
            return Err(ProcessingError::InvalidConfig(format!(
                "min_relative_focal_ratio {} must be non-negative",
                self.stitch.min_relative_focal_ratio
            )));
        }
        if self.stitch.blend_strength < 0.0 || self.stitch.work_megapix <= 0.0 {
            return Err(ProcessingError::InvalidConfig(
                "blend_strength must be non-negative and work_megapix positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let projection = &self.projection;
        let orientation = Orientation {
            roll: projection.orientation_deg.roll.to_radians(),
            pitch: projection.orientation_deg.pitch.to_radians(),
            yaw: projection.orientation_deg.yaw.to_radians(),
        };
        EngineConfig {
            policy: self.policy,
            window: WindowConfig {
                window_size: self.window.window_size,
                best_k: self.window.best_k,
                reuse_horizon: self.window.reuse_horizon,
            },
            stitch: StitchParams {
                mask_ratio: self.stitch.mask_ratio,
                blend_strength: self.stitch.blend_strength,
                work_megapix: self.stitch.work_megapix,
                min_focal_agreement: self.stitch.min_focal_agreement,
                min_relative_focal_ratio: self.stitch.min_relative_focal_ratio,
                border: self.stitch.border,
            },
            correction: CorrectionConfig {
                field_of_view: projection.field_of_view_deg.to_radians(),
                lens_field_of_view: projection.lens_field_of_view_deg.map(f64::to_radians),
                mapping: projection.mapping,
                orientation,
                interpolation: projection.interpolation,
                mode: projection.mode,
                output_size: projection.output_size,
            },
        }
    }

    pub fn backend_config(&self) -> FeatherBackendConfig {
        FeatherBackendConfig {
            fast_threshold: self.backend.fast_threshold,
            max_features: self.backend.max_features,
            match_ratio: self.backend.match_ratio,
            min_matches: self.backend.min_matches,
            ..FeatherBackendConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_fills_defaults() {
        let yaml = "inputs: [cam0, cam1]\npolicy: double_sided\nstitch:\n  border: contour_with_fallback\n";
        let config: ProcessingConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.policy, StitchPolicy::DoubleSided);
        assert_eq!(config.stitch.border, BorderStrategy::ContourWithFallback);
        assert_eq!(config.window.best_k, 7);
        assert_eq!(config.projection.field_of_view_deg, 95.0);
        assert_eq!(config.stitch.min_relative_focal_ratio, 1e-4);
        assert!(config.write_report);
        config.validate().unwrap();
    }

    #[test]
    fn yaml_round_trip_keeps_settings() {
        let mut config = ProcessingConfig {
            inputs: vec![PathBuf::from("a"), PathBuf::from("b")],
            max_frames: Some(12),
            ..ProcessingConfig::default()
        };
        config.projection.mode = CorrectionMode::Perspective { focal_length: 320.0 };
        config.projection.mapping = DistanceMapping::Equisolid;

        let parsed: ProcessingConfig = serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed.max_frames, Some(12));
        assert_eq!(parsed.projection.mode, config.projection.mode);
        assert_eq!(parsed.projection.mapping, DistanceMapping::Equisolid);
    }

    #[test]
    fn degrees_become_radians_in_engine_config() {
        let mut config = ProcessingConfig::default();
        config.projection.orientation_deg.yaw = 90.0;
        let engine = config.engine_config();
        assert!((engine.correction.field_of_view - 95f64.to_radians()).abs() < 1e-12);
        assert!((engine.correction.orientation.yaw - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn invalid_settings_are_reported() {
        let mut config = ProcessingConfig::default();
        assert!(matches!(config.validate(), Err(ProcessingError::InvalidConfig(_))));

        config.inputs.push(PathBuf::from("cam0"));
        config.projection.lens_field_of_view_deg = Some(60.0);
        assert!(matches!(config.validate(), Err(ProcessingError::InvalidConfig(_))));
    }
}
