use log::debug;
use panofish_core::calib::CameraParams;
use panofish_core::contracts::{BackendError, ImageFeatures, PairwiseMatches};
use panofish_core::math::{median, rotation_about_y};

/// Horizontal viewing angle of each matched pair under a pinhole with focal `focal`.
fn angle_differences(
    src: &ImageFeatures,
    dst: &ImageFeatures,
    pair: &PairwiseMatches,
    focal: f64,
    ppx_src: f64,
    ppx_dst: f64,
) -> Vec<f64> {
    pair.matches
        .iter()
        .filter_map(|m| {
            let a = src.keypoints.get(m.query)?;
            let b = dst.keypoints.get(m.train)?;
            let alpha_a = ((a.x as f64 - ppx_src) / focal).atan();
            let alpha_b = ((b.x as f64 - ppx_dst) / focal).atan();
            Some(alpha_a - alpha_b)
        })
        .collect()
}

fn find_pair<'a>(matches: &'a [PairwiseMatches], src: usize, dst: usize) -> Option<&'a PairwiseMatches> {
    matches
        .iter()
        .find(|m| m.src_image == src && m.dst_image == dst)
}

/// Focal length of a pinhole whose horizontal field of view is `fov` across `width` pixels.
pub fn focal_from_fov(width: u32, fov: f64) -> f64 {
    (width as f64 * 0.5) / (fov * 0.5).tan()
}

/// Chains yaw offsets along consecutive pairs, then centers the rig on its mean yaw.
pub fn cameras_from_yaw_steps(features: &[ImageFeatures], steps: &[f64], focal: f64) -> Vec<CameraParams> {
    let mut yaws = Vec::with_capacity(features.len());
    let mut yaw = 0.0;
    yaws.push(yaw);
    for step in steps {
        yaw += step;
        yaws.push(yaw);
    }
    let mean = yaws.iter().sum::<f64>() / yaws.len() as f64;

    features
        .iter()
        .zip(yaws)
        .map(|(f, yaw)| {
            let (w, h) = f.image_size;
            CameraParams::new(rotation_about_y(yaw - mean), focal, w as f64 * 0.5, h as f64 * 0.5)
        })
        .collect()
}

/// Median angular offset between every consecutive pair.
pub fn estimate_yaw_steps(
    features: &[ImageFeatures],
    matches: &[PairwiseMatches],
    focal: f64,
    min_matches: usize,
) -> Result<Vec<f64>, BackendError> {
    let mut steps = Vec::with_capacity(features.len().saturating_sub(1));
    for i in 0..features.len().saturating_sub(1) {
        let pair = find_pair(matches, i, i + 1).ok_or(BackendError::NoOverlap { src: i, dst: i + 1 })?;
        if pair.matches.len() < min_matches {
            return Err(BackendError::NoOverlap { src: i, dst: i + 1 });
        }
        let ppx_a = features[i].image_size.0 as f64 * 0.5;
        let ppx_b = features[i + 1].image_size.0 as f64 * 0.5;
        let diffs = angle_differences(&features[i], &features[i + 1], pair, focal, ppx_a, ppx_b);
        let step = median(&diffs).ok_or(BackendError::NoOverlap { src: i, dst: i + 1 })?;
        debug!("pair {i}->{}: yaw step {:.4} rad from {} matches", i + 1, step, diffs.len());
        steps.push(step);
    }
    Ok(steps)
}

/// Re-fits each yaw step on the matches that agree with the current estimate.
pub fn refine_yaw_steps(
    features: &[ImageFeatures],
    matches: &[PairwiseMatches],
    cameras: &[CameraParams],
    inlier_threshold: f64,
    min_matches: usize,
) -> Vec<f64> {
    let yaw_of = |c: &CameraParams| c.rotation[(0, 2)].atan2(c.rotation[(0, 0)]);
    let mut steps = Vec::with_capacity(cameras.len().saturating_sub(1));
    for i in 0..cameras.len().saturating_sub(1) {
        let current = yaw_of(&cameras[i + 1]) - yaw_of(&cameras[i]);
        let refined = find_pair(matches, i, i + 1).and_then(|pair| {
            let diffs = angle_differences(
                &features[i],
                &features[i + 1],
                pair,
                cameras[i].focal,
                cameras[i].ppx,
                cameras[i + 1].ppx,
            );
            let inliers: Vec<f64> = diffs
                .into_iter()
                .filter(|d| (d - current).abs() < inlier_threshold)
                .collect();
            (inliers.len() >= min_matches).then(|| inliers.iter().sum::<f64>() / inliers.len() as f64)
        });
        steps.push(refined.unwrap_or(current));
    }
    steps
}

/// Matches closer than this to the horizon carry no vertical scale.
const MIN_VERTICAL_OFFSET: f64 = 2.0;

/// Per-camera focal lengths chained from the vertical scale between consecutive views.
///
/// For a rotation about the vertical axis, `(y - ppy) * cos(alpha)` of a scene point
/// is proportional to the focal length, `alpha` being its horizontal viewing angle.
/// Pairs without enough usable matches keep the previous focal.
pub fn refine_focals(
    features: &[ImageFeatures],
    matches: &[PairwiseMatches],
    cameras: &[CameraParams],
    min_matches: usize,
) -> Vec<f64> {
    let mut focals = Vec::with_capacity(cameras.len());
    let Some(first) = cameras.first() else {
        return focals;
    };
    focals.push(first.focal);

    for i in 0..cameras.len().saturating_sub(1) {
        let (a_cam, b_cam) = (&cameras[i], &cameras[i + 1]);
        let ratios: Vec<f64> = find_pair(matches, i, i + 1)
            .map(|pair| {
                pair.matches
                    .iter()
                    .filter_map(|m| {
                        let a = features[i].keypoints.get(m.query)?;
                        let b = features[i + 1].keypoints.get(m.train)?;
                        let alpha_a = ((a.x as f64 - a_cam.ppx) / a_cam.focal).atan();
                        let alpha_b = ((b.x as f64 - b_cam.ppx) / b_cam.focal).atan();
                        let da = (a.y as f64 - a_cam.ppy) * alpha_a.cos();
                        let db = (b.y as f64 - b_cam.ppy) * alpha_b.cos();
                        (da.abs() >= MIN_VERTICAL_OFFSET && da.signum() == db.signum())
                            .then(|| db / da)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let scale = if ratios.len() >= min_matches {
            median(&ratios).unwrap_or(1.0).clamp(0.5, 2.0)
        } else {
            1.0
        };
        debug!("pair {i}->{}: focal scale {scale:.4} from {} matches", i + 1, ratios.len());
        focals.push(focals[i] * scale);
    }
    focals
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use panofish_core::contracts::{FeatureMatch, Keypoint};

    fn features_at(index: usize, xs: &[f32]) -> ImageFeatures {
        ImageFeatures {
            image_index: index,
            image_size: (200, 100),
            keypoints: xs.iter().map(|&x| Keypoint { x, y: 50.0, response: 1.0 }).collect(),
            descriptors: xs.iter().map(|_| vec![0.0]).collect(),
        }
    }

    #[test]
    fn yaw_chain_is_centered() {
        let focal = 100.0;
        let a = features_at(0, &[150.0, 160.0, 170.0]);
        let b = features_at(1, &[50.0, 60.0, 70.0]);
        let pair = PairwiseMatches {
            src_image: 0,
            dst_image: 1,
            matches: (0..3)
                .map(|i| FeatureMatch { query: i, train: i, distance: 0.0 })
                .collect(),
            confidence: 1.0,
        };
        let features = vec![a, b];
        let steps = estimate_yaw_steps(&features, std::slice::from_ref(&pair), focal, 3).unwrap();
        let expected = (0.6f64).atan() - (-0.4f64).atan();
        assert_relative_eq!(steps[0], expected, epsilon = 1e-9);

        let cameras = cameras_from_yaw_steps(&features, &steps, focal);
        let yaw = |c: &CameraParams| c.rotation[(0, 2)].atan2(c.rotation[(0, 0)]);
        assert_relative_eq!(yaw(&cameras[0]), -yaw(&cameras[1]), epsilon = 1e-9);
        assert!(estimate_yaw_steps(&features, &[pair], focal, 4).is_err());
    }

    #[test]
    fn focal_follows_vertical_scale() {
        let a = ImageFeatures {
            image_index: 0,
            image_size: (200, 100),
            keypoints: [10.0, 20.0, -15.0, 30.0]
                .iter()
                .map(|&dy| Keypoint { x: 100.0, y: 50.0 + dy, response: 1.0 })
                .collect(),
            descriptors: vec![vec![0.0]; 4],
        };
        let mut b = a.clone();
        b.image_index = 1;
        for kp in &mut b.keypoints {
            kp.y = 50.0 + (kp.y - 50.0) * 1.05;
        }
        let pair = PairwiseMatches {
            src_image: 0,
            dst_image: 1,
            matches: (0..4)
                .map(|i| FeatureMatch { query: i, train: i, distance: 0.0 })
                .collect(),
            confidence: 1.0,
        };
        let features = vec![a, b];
        let cameras = cameras_from_yaw_steps(&features, &[0.0], 100.0);

        let focals = refine_focals(&features, std::slice::from_ref(&pair), &cameras, 3);
        assert_relative_eq!(focals[0], 100.0, epsilon = 1e-12);
        assert_relative_eq!(focals[1], 105.0, epsilon = 1e-6);

        // Too few matches leave the chain unchanged.
        let focals = refine_focals(&features, &[pair], &cameras, 5);
        assert_eq!(focals, vec![100.0, 100.0]);
    }
}
