pub mod border;
pub mod cache;
pub mod calib;
pub mod contracts;
pub mod errors;
pub mod img;
pub mod logs;
pub mod math;

pub use errors::{PanoError, Result};

#[cfg(test)]
mod tests {
    use crate::calib::{CalibrationSnapshot, CameraParams, MIN_FOCAL_AGREEMENT};
    use crate::img::MaskRatio;
    use crate::math::rotation::rotation_about_y;

    #[test]
    fn snapshot_focal_spread_marks_degenerate() {
        let cameras = vec![
            CameraParams::new(rotation_about_y(-0.3), 400.0, 200.0, 150.0),
            CameraParams::new(rotation_about_y(0.3), 200.0, 200.0, 150.0),
        ];
        let snapshot =
            CalibrationSnapshot::from_cameras(MaskRatio::default(), (400, 300), cameras, 300.0)
                .expect("valid cameras");

        assert!(snapshot.focal_agreement() < MIN_FOCAL_AGREEMENT);
        assert!(snapshot.is_degenerate());
        assert_eq!(snapshot.quality_score(), 0.0);
    }
}
