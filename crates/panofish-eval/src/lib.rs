use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use log::info;
use panofish_backend::FeatherBackend;
use panofish_core::PanoError;
use panofish_core::cache::WindowConfig;
use panofish_core::calib::{CameraParams, ranges_disjoint_and_ordered};
use panofish_core::contracts::{
    BackendError, ImageFeatures, PairwiseMatches, VisionBackend, WarpedView,
};
use panofish_core::img::{PixelRect, non_black_ratio};
use panofish_core::math::{DistanceMapping, ProjectionParams, rotation_about_y};
use panofish_engine::{CorrectionConfig, EngineConfig, PanoramaEngine, StitchPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to read scenario file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse scenario JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scenario is invalid: {0}")]
    InvalidScenario(String),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PanoError),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Scenario {
    pub name: String,
    pub camera: ScenarioCamera,
    pub rig: ScenarioRig,
    pub pattern: ScenePattern,
    pub frame_count: usize,
    #[serde(default)]
    pub policy: StitchPolicy,
    pub window: ScenarioWindow,
    pub thresholds: ScenarioThresholds,
}

impl Scenario {
    fn validate(&self) -> Result<(), EvalError> {
        if self.frame_count == 0 {
            return Err(EvalError::InvalidScenario(
                "scenario must contain at least one frame".to_string(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.width < self.camera.height
        {
            return Err(EvalError::InvalidScenario(
                "camera frames must be non-empty and at least as wide as tall".to_string(),
            ));
        }
        if !(self.camera.field_of_view_deg > 0.0 && self.camera.field_of_view_deg <= 360.0) {
            return Err(EvalError::InvalidScenario(format!(
                "field of view {} deg is out of range",
                self.camera.field_of_view_deg
            )));
        }
        if self.rig.yaws_deg.is_empty() {
            return Err(EvalError::InvalidScenario(
                "rig needs at least one camera".to_string(),
            ));
        }
        if self.rig.yaws_deg.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(EvalError::InvalidScenario(
                "rig yaws must increase left to right".to_string(),
            ));
        }
        if self.window.window_size == 0 || self.window.best_k == 0 {
            return Err(EvalError::InvalidScenario(
                "window size and best_k must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioCamera {
    pub width: u32,
    pub height: u32,
    pub field_of_view_deg: f64,
    #[serde(default)]
    pub mapping: DistanceMapping,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioRig {
    /// Camera headings left to right, degrees.
    pub yaws_deg: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenePattern {
    /// Longitude/latitude checkerboard painted on the surrounding sphere.
    Checkerboard {
        cell_deg: f64,
        low: u8,
        high: u8,
        #[serde(default)]
        drift_deg_per_frame: f64,
    },
    Flat {
        value: u8,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioWindow {
    pub window_size: u64,
    pub best_k: usize,
    pub reuse_horizon: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioThresholds {
    pub min_non_black_ratio: f64,
    #[serde(default)]
    pub max_dropped_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub scenario_name: String,
    pub frame_count: usize,
    pub delivered_frames: usize,
    pub dropped_frames: usize,
    pub review_frames: usize,
    pub min_non_black_ratio: f64,
    pub mean_non_black_ratio: f64,
    pub mean_retained_area: f64,
    pub ranges_ordered: bool,
    pub failures: Vec<String>,
}

impl EvaluationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Relative focal offset per view; a real solve never returns bit-identical focals.
const ORACLE_FOCAL_SPREAD: f64 = 1e-3;

/// Backend that knows the rig headings instead of estimating them.
///
/// Seams and blending are delegated to [`FeatherBackend`].
pub struct OracleBackend {
    yaws: Vec<f64>,
    field_of_view: f64,
    blender: FeatherBackend,
}

impl OracleBackend {
    pub fn new(yaws: Vec<f64>, field_of_view: f64) -> Self {
        Self {
            yaws,
            field_of_view,
            blender: FeatherBackend::default(),
        }
    }
}

impl VisionBackend for OracleBackend {
    fn find_features(
        &self,
        image: &RgbImage,
        image_index: usize,
        _rois: &[PixelRect],
    ) -> Result<ImageFeatures, BackendError> {
        Ok(ImageFeatures {
            image_index,
            image_size: image.dimensions(),
            keypoints: Vec::new(),
            descriptors: Vec::new(),
        })
    }

    fn match_features(
        &self,
        src: &ImageFeatures,
        dst: &ImageFeatures,
    ) -> Result<PairwiseMatches, BackendError> {
        Ok(PairwiseMatches {
            src_image: src.image_index,
            dst_image: dst.image_index,
            matches: Vec::new(),
            confidence: 1.0,
        })
    }

    fn estimate_cameras(
        &self,
        features: &[ImageFeatures],
        _matches: &[PairwiseMatches],
    ) -> Result<Vec<CameraParams>, BackendError> {
        if features.len() != self.yaws.len() {
            return Err(BackendError::Estimation(format!(
                "oracle knows {} cameras, got {} views",
                self.yaws.len(),
                features.len()
            )));
        }
        let mean = self.yaws.iter().sum::<f64>() / self.yaws.len() as f64;
        Ok(features
            .iter()
            .zip(&self.yaws)
            .enumerate()
            .map(|(i, (f, yaw))| {
                let (width, height) = f.image_size;
                CameraParams::new(
                    rotation_about_y(yaw - mean),
                    width as f64 / self.field_of_view * (1.0 + ORACLE_FOCAL_SPREAD * i as f64),
                    width as f64 / 2.0,
                    height as f64 / 2.0,
                )
            })
            .collect())
    }

    fn refine_cameras(
        &self,
        _features: &[ImageFeatures],
        _matches: &[PairwiseMatches],
        cameras: Vec<CameraParams>,
    ) -> Result<Vec<CameraParams>, BackendError> {
        Ok(cameras)
    }

    fn find_seams(&self, views: &mut [WarpedView]) -> Result<(), BackendError> {
        self.blender.find_seams(views)
    }

    fn blend(&self, views: &[WarpedView], strength: f32) -> Result<RgbImage, BackendError> {
        self.blender.blend(views, strength)
    }
}

pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario, EvalError> {
    let path = path.as_ref();
    let payload = fs::read_to_string(path).map_err(|source| EvalError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let scenario: Scenario = serde_json::from_str(&payload)?;
    scenario.validate()?;
    Ok(scenario)
}

pub fn evaluate_scenario_path(path: impl AsRef<Path>) -> Result<EvaluationReport, EvalError> {
    let scenario = load_scenario(path)?;
    evaluate_scenario(&scenario)
}

pub fn evaluate_scenario(scenario: &Scenario) -> Result<EvaluationReport, EvalError> {
    scenario.validate()?;

    let field_of_view = scenario.camera.field_of_view_deg.to_radians();
    let yaws: Vec<f64> = scenario.rig.yaws_deg.iter().map(|y| y.to_radians()).collect();
    let config = EngineConfig {
        policy: scenario.policy,
        window: WindowConfig {
            window_size: scenario.window.window_size,
            best_k: scenario.window.best_k,
            reuse_horizon: scenario.window.reuse_horizon,
        },
        correction: CorrectionConfig {
            field_of_view,
            mapping: scenario.camera.mapping,
            ..CorrectionConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut engine = PanoramaEngine::new(
        config,
        Box::new(OracleBackend::new(yaws.clone(), field_of_view)),
    );
    engine.calibrate((scenario.camera.width, scenario.camera.height))?;

    let mut outputs = Vec::with_capacity(scenario.frame_count);
    for frame_index in 0..scenario.frame_count {
        let frames = yaws
            .iter()
            .map(|&yaw| render_fisheye(scenario, yaw, frame_index))
            .collect();
        outputs.extend(engine.ingest(frames));
    }
    outputs.extend(engine.finish());
    info!(
        "{}: {} of {} frames delivered",
        scenario.name,
        outputs.iter().filter(|o| o.image.is_some()).count(),
        scenario.frame_count
    );

    let mut failures = Vec::new();
    if outputs.len() != scenario.frame_count {
        failures.push(format!(
            "engine returned {} frames for {} inputs",
            outputs.len(),
            scenario.frame_count
        ));
    }

    let mut ratios = Vec::new();
    let mut retained = Vec::new();
    let mut ranges_ordered = true;
    for output in &outputs {
        let Some(image) = &output.image else {
            continue;
        };
        ratios.push(non_black_ratio(image));
        retained.push(output.report.retained_area_fraction);
        let ranges = &output.composition_ranges;
        if ranges.len() != yaws.len() || !ranges_disjoint_and_ordered(ranges) {
            ranges_ordered = false;
            failures.push(format!(
                "frame {}: composition ranges {ranges:?} are not disjoint and ordered",
                output.frame_index
            ));
        }
    }

    let delivered_frames = ratios.len();
    let dropped_frames = outputs.len() - delivered_frames;
    let min_non_black_ratio = ratios.iter().copied().fold(f64::INFINITY, f64::min);
    let min_non_black_ratio = if min_non_black_ratio.is_finite() {
        min_non_black_ratio
    } else {
        0.0
    };

    if dropped_frames > scenario.thresholds.max_dropped_frames {
        failures.push(format!(
            "{dropped_frames} frames dropped, at most {} allowed",
            scenario.thresholds.max_dropped_frames
        ));
    }
    if min_non_black_ratio <= scenario.thresholds.min_non_black_ratio {
        failures.push(format!(
            "non-black ratio {min_non_black_ratio:.4} not above threshold {:.4}",
            scenario.thresholds.min_non_black_ratio
        ));
    }

    Ok(EvaluationReport {
        scenario_name: scenario.name.clone(),
        frame_count: scenario.frame_count,
        delivered_frames,
        dropped_frames,
        review_frames: outputs.iter().filter(|o| o.report.needs_review).count(),
        min_non_black_ratio,
        mean_non_black_ratio: mean(&ratios),
        mean_retained_area: mean(&retained),
        ranges_ordered,
        failures,
    })
}

/// Raw fisheye frame of a camera heading `yaw` inside the scene sphere.
///
/// The circle touches the top and bottom of the frame; everything outside it is black.
pub fn render_fisheye(scenario: &Scenario, yaw: f64, frame_index: usize) -> RgbImage {
    let camera = &scenario.camera;
    let radius = camera.height / 2;
    let params = ProjectionParams::new(
        (camera.width / 2, radius),
        radius,
        camera.field_of_view_deg.to_radians(),
    )
    .with_mapping(camera.mapping);
    let heading = rotation_about_y(yaw);

    RgbImage::from_fn(camera.width, camera.height, |x, y| {
        let Some(ray) = params.unproject_pixel(x as f64 + 0.5, y as f64 + 0.5) else {
            return Rgb([0, 0, 0]);
        };
        let world = heading * ray;
        let lon = world.x.atan2(world.z);
        let lat = world.y.clamp(-1.0, 1.0).asin();
        scene_color(&scenario.pattern, lon, lat, frame_index)
    })
}

fn scene_color(pattern: &ScenePattern, lon: f64, lat: f64, frame_index: usize) -> Rgb<u8> {
    match pattern {
        ScenePattern::Checkerboard {
            cell_deg,
            low,
            high,
            drift_deg_per_frame,
        } => {
            let cell = cell_deg.max(1e-3);
            let lon_deg = lon.to_degrees() + drift_deg_per_frame * frame_index as f64;
            let checker = ((lon_deg / cell).floor() + (lat.to_degrees() / cell).floor()) as i64;
            let v = if checker.rem_euclid(2) == 0 { *low } else { *high };
            Rgb([v, v / 2 + 60, 255 - v / 2])
        }
        ScenePattern::Flat { value } => Rgb([*value, *value, *value]),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(width: u32, height: u32) -> Scenario {
        Scenario {
            name: "unit".to_string(),
            camera: ScenarioCamera {
                width,
                height,
                field_of_view_deg: 95.0,
                mapping: DistanceMapping::Equidistant,
            },
            rig: ScenarioRig {
                yaws_deg: vec![-20.0, 20.0],
            },
            pattern: ScenePattern::Checkerboard {
                cell_deg: 10.0,
                low: 40,
                high: 220,
                drift_deg_per_frame: 0.0,
            },
            frame_count: 1,
            policy: StitchPolicy::OneSided,
            window: ScenarioWindow {
                window_size: 1,
                best_k: 1,
                reuse_horizon: 1,
            },
            thresholds: ScenarioThresholds {
                min_non_black_ratio: 0.7,
                max_dropped_frames: 0,
            },
        }
    }

    #[test]
    fn render_leaves_outside_of_circle_black() {
        let scenario = scenario(120, 100);
        let frame = render_fisheye(&scenario, 0.0, 0);

        assert_eq!(*frame.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*frame.get_pixel(119, 99), Rgb([0, 0, 0]));
        assert_ne!(*frame.get_pixel(60, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn heading_shifts_the_scene() {
        let scenario = scenario(100, 100);
        let ahead = render_fisheye(&scenario, 0.0, 0);
        let turned = render_fisheye(&scenario, 10f64.to_radians(), 0);
        // Turning by one checker cell flips the color under the optical axis.
        assert_ne!(ahead.get_pixel(50, 50), turned.get_pixel(50, 50));
    }

    #[test]
    fn invalid_rig_is_rejected() {
        let mut scenario = scenario(100, 100);
        scenario.rig.yaws_deg = vec![20.0, -20.0];
        assert!(matches!(
            evaluate_scenario(&scenario),
            Err(EvalError::InvalidScenario(_))
        ));
    }

    #[test]
    fn oracle_centers_the_rig() {
        let oracle = OracleBackend::new(vec![-0.2, 0.4], 1.0);
        let features: Vec<ImageFeatures> = (0..2)
            .map(|i| ImageFeatures {
                image_index: i,
                image_size: (200, 100),
                keypoints: Vec::new(),
                descriptors: Vec::new(),
            })
            .collect();
        let cameras = oracle.estimate_cameras(&features, &[]).unwrap();
        let yaw = |c: &CameraParams| c.rotation[(0, 2)].atan2(c.rotation[(0, 0)]);

        assert!((yaw(&cameras[0]) + 0.3).abs() < 1e-12);
        assert!((yaw(&cameras[1]) - 0.3).abs() < 1e-12);
        assert_eq!(cameras[0].focal, 200.0);
        assert!((cameras[1].focal - 200.2).abs() < 1e-9);
    }
}
