use image::{Rgb, RgbImage};
use panofish_backend::{FeatherBackend, focal_from_fov};
use panofish_core::contracts::VisionBackend;
use panofish_core::img::{MaskRatio, feature_rois};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BLOCK: u32 = 4;

fn block_texture(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let cols = width.div_ceil(BLOCK);
    let rows = height.div_ceil(BLOCK);
    let values: Vec<u8> = (0..cols * rows).map(|_| rng.random_range(16..=255)).collect();
    RgbImage::from_fn(width, height, |x, y| {
        let v = values[((y / BLOCK) * cols + x / BLOCK) as usize];
        Rgb([v, v / 2 + 40, 255 - v / 2])
    })
}

fn yaw(rotation: &nalgebra::Matrix3<f64>) -> f64 {
    rotation[(0, 2)].atan2(rotation[(0, 0)])
}

#[test]
fn recovers_yaw_of_shifted_crop() {
    let texture = block_texture(320, 120, 11);
    let left = image::imageops::crop_imm(&texture, 0, 0, 200, 120).to_image();
    let right = image::imageops::crop_imm(&texture, 120, 0, 200, 120).to_image();

    let backend = FeatherBackend::default();
    let ratio = MaskRatio::default();
    let features = vec![
        backend
            .find_features(&left, 0, &feature_rois(200, 120, 0, 2, ratio))
            .unwrap(),
        backend
            .find_features(&right, 1, &feature_rois(200, 120, 1, 2, ratio))
            .unwrap(),
    ];
    let matches = vec![backend.match_features(&features[0], &features[1]).unwrap()];
    assert!(matches[0].matches.len() >= backend.config().min_matches);

    let cameras = backend.estimate_cameras(&features, &matches).unwrap();
    let cameras = backend.refine_cameras(&features, &matches, cameras).unwrap();

    let focal = focal_from_fov(200, backend.config().field_of_view_hint);
    let expected = 2.0 * (60.0 / focal).atan();
    let step = yaw(&cameras[1].rotation) - yaw(&cameras[0].rotation);
    assert!((step - expected).abs() < 0.02, "step {step} vs {expected}");
    assert!((yaw(&cameras[0].rotation) + yaw(&cameras[1].rotation)).abs() < 1e-9);
}

#[test]
fn featureless_view_is_reported() {
    let backend = FeatherBackend::default();
    let black = RgbImage::new(200, 120);
    let err = backend
        .find_features(&black, 3, &feature_rois(200, 120, 0, 1, MaskRatio::default()))
        .unwrap_err();
    assert!(matches!(
        err,
        panofish_core::contracts::BackendError::NotEnoughFeatures { image_index: 3, found: 0 }
    ));
}
