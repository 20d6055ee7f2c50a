use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Orientation correction applied to viewing rays before they hit the lens model.
/// Angles are in radians; the default is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
}

impl Orientation {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn is_identity(&self) -> bool {
        self.roll == 0.0 && self.pitch == 0.0 && self.yaw == 0.0
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Rotation3::from_euler_angles(self.roll, self.pitch, self.yaw).into_inner()
    }
}

/// Rotation about the vertical (y) axis, used for panning cameras around a rig.
pub fn rotation_about_y(angle: f64) -> Matrix3<f64> {
    Rotation3::from_axis_angle(&Vector3::y_axis(), angle).into_inner()
}

/// Projects a nearly-orthonormal matrix back onto SO(3).
pub fn orthonormalize(matrix: &Matrix3<f64>) -> Matrix3<f64> {
    Rotation3::from_matrix(matrix).into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn identity_orientation_is_identity_matrix() {
        let orientation = Orientation::identity();
        assert!(orientation.is_identity());
        assert_relative_eq!(orientation.matrix(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn averaged_rotations_are_reprojected() {
        let a = rotation_about_y(0.2);
        let b = rotation_about_y(0.4);
        let mean = orthonormalize(&((a + b) * 0.5));

        assert_relative_eq!(mean * mean.transpose(), Matrix3::identity(), epsilon = 1e-9);
        assert_relative_eq!(mean, rotation_about_y(0.3), epsilon = 1e-6);
    }
}
