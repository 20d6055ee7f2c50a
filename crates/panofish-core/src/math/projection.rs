use std::f64::consts::{FRAC_PI_2, PI, TAU};

use image::RgbImage;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::errors::{PanoError, Result};
use crate::img::image_utils::{bilinear_sample_rgb, nearest_sample_rgb};
use crate::math::rotation::Orientation;

/// Radial lens model relating the off-axis angle to the distance from the circle center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMapping {
    /// r = f·θ
    #[default]
    Equidistant,
    /// r = 2f·sin(θ/2)
    Equisolid,
    /// r = f·sin θ, only defined up to a 180° field of view.
    Orthographic,
    /// r = 2f·tan(θ/2)
    Stereographic,
}

impl DistanceMapping {
    /// Normalized radial distance for an off-axis angle.
    pub fn radial(self, theta: f64) -> f64 {
        match self {
            DistanceMapping::Equidistant => theta,
            DistanceMapping::Equisolid => 2.0 * (theta * 0.5).sin(),
            DistanceMapping::Orthographic => theta.sin(),
            DistanceMapping::Stereographic => 2.0 * (theta * 0.5).tan(),
        }
    }

    /// Inverse of [`DistanceMapping::radial`]; `None` when the value is unreachable.
    pub fn inverse_radial(self, value: f64) -> Option<f64> {
        match self {
            DistanceMapping::Equidistant => Some(value),
            DistanceMapping::Equisolid => {
                let half = value * 0.5;
                (half <= 1.0).then(|| 2.0 * half.asin())
            }
            DistanceMapping::Orthographic => (value <= 1.0).then(|| value.asin()),
            DistanceMapping::Stereographic => Some(2.0 * (value * 0.5).atan()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

/// Geometry of one fisheye circle. Built once per run and never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionParams {
    /// Circle center in pixels of the (square) fisheye image.
    pub center: (u32, u32),
    pub radius: u32,
    /// Full field of view covered by the circle, in radians.
    pub field_of_view: f64,
    pub mapping: DistanceMapping,
    pub orientation: Orientation,
    pub interpolation: Interpolation,
}

impl ProjectionParams {
    pub fn new(center: (u32, u32), radius: u32, field_of_view: f64) -> Self {
        Self {
            center,
            radius,
            field_of_view,
            mapping: DistanceMapping::default(),
            orientation: Orientation::identity(),
            interpolation: Interpolation::default(),
        }
    }

    pub fn with_mapping(mut self, mapping: DistanceMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Lens constant chosen so that half the field of view lands on the circle edge.
    /// For the equidistant model this is `radius / (fov / 2)`.
    pub fn focal(&self) -> f64 {
        self.radius as f64 / self.mapping.radial(self.field_of_view * 0.5)
    }

    pub fn validate(&self) -> Result<()> {
        if self.radius == 0 {
            return Err(PanoError::PreconditionViolation(
                "fisheye radius must be positive".to_string(),
            ));
        }
        let fov = self.field_of_view;
        if !fov.is_finite() || fov <= 0.0 || fov > TAU {
            return Err(PanoError::PreconditionViolation(format!(
                "field of view {fov} rad is outside (0, 2π]"
            )));
        }
        if self.mapping == DistanceMapping::Orthographic && fov > PI {
            return Err(PanoError::PreconditionViolation(
                "orthographic mapping cannot cover more than 180 degrees".to_string(),
            ));
        }
        Ok(())
    }

    /// Fisheye pixel hit by a unit ray in the lens frame, `None` outside the circle.
    pub fn project_ray(&self, ray: &Vector3<f64>) -> Option<(f64, f64)> {
        let theta = ray.z.clamp(-1.0, 1.0).acos();
        if theta > self.field_of_view * 0.5 + 1e-9 {
            return None;
        }
        let rho = self.focal() * self.mapping.radial(theta);
        if rho > self.radius as f64 {
            return None;
        }
        let phi = ray.y.atan2(ray.x);
        Some((
            self.center.0 as f64 + rho * phi.cos(),
            self.center.1 as f64 - rho * phi.sin(),
        ))
    }

    /// Unit ray for a fisheye pixel, `None` outside the circle.
    pub fn unproject_pixel(&self, u: f64, v: f64) -> Option<Vector3<f64>> {
        let du = u - self.center.0 as f64;
        let dv = self.center.1 as f64 - v;
        let rho = du.hypot(dv);
        if rho > self.radius as f64 {
            return None;
        }
        let theta = self.mapping.inverse_radial(rho / self.focal())?;
        let phi = azimuth(du, dv);
        Some(Vector3::new(
            theta.sin() * phi.cos(),
            theta.sin() * phi.sin(),
            theta.cos(),
        ))
    }

    fn rotation(&self) -> Option<Matrix3<f64>> {
        (!self.orientation.is_identity()).then(|| self.orientation.matrix())
    }
}

/// Azimuth of a circle offset `(u, v)` with `v` pointing up.
///
/// The center maps to 0, the positive vertical axis to π/2 and the negative
/// vertical axis to 3π/2.
pub fn azimuth(u: f64, v: f64) -> f64 {
    let r = u.hypot(v);
    if r == 0.0 {
        0.0
    } else if u > 0.0 {
        (v / r).asin()
    } else if u < 0.0 {
        PI - (v / r).asin()
    } else if v > 0.0 {
        FRAC_PI_2
    } else {
        3.0 * FRAC_PI_2
    }
}

/// Longitude/latitude layout of an equirectangular canvas spanning `field_of_view`
/// in both directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquirectGrid {
    pub width: u32,
    pub height: u32,
    pub field_of_view: f64,
}

impl EquirectGrid {
    pub fn new(width: u32, height: u32, field_of_view: f64) -> Self {
        Self {
            width,
            height,
            field_of_view,
        }
    }

    pub fn longitude(&self, x: f64) -> f64 {
        ((x + 0.5) / self.width as f64 - 0.5) * self.field_of_view
    }

    pub fn latitude(&self, y: f64) -> f64 {
        (0.5 - (y + 0.5) / self.height as f64) * self.field_of_view
    }

    /// Longitude covered between the first and last pixel centers.
    pub fn angular_span(&self) -> f64 {
        self.longitude(self.width as f64 - 1.0) - self.longitude(0.0)
    }

    pub fn direction(&self, x: f64, y: f64) -> Vector3<f64> {
        let lon = self.longitude(x);
        let lat = self.latitude(y);
        Vector3::new(lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos())
    }

    /// Canvas position of a unit direction, `None` when it falls outside the canvas.
    pub fn pixel(&self, direction: &Vector3<f64>) -> Option<(f64, f64)> {
        let lon = direction.x.atan2(direction.z);
        let lat = direction.y.clamp(-1.0, 1.0).asin();
        let half = self.field_of_view * 0.5;
        if lon.abs() > half || lat.abs() > half {
            return None;
        }
        let x = (lon / self.field_of_view + 0.5) * self.width as f64 - 0.5;
        let y = (0.5 - lat / self.field_of_view) * self.height as f64 - 0.5;
        Some((x, y))
    }
}

/// Precomputed destination-to-source lookup table.
///
/// Building the table is the expensive part of every projection; a video run builds
/// it once per camera and applies it to every frame.
#[derive(Debug, Clone)]
pub struct ProjectionMap {
    size: (u32, u32),
    source_size: (u32, u32),
    coords: Vec<Option<(f32, f32)>>,
}

impl ProjectionMap {
    pub fn fisheye_to_equirectangular(
        source_size: (u32, u32),
        target_size: (u32, u32),
        params: &ProjectionParams,
    ) -> Result<Self> {
        require_square(source_size, "fisheye source")?;
        require_non_empty(target_size, "equirectangular target")?;
        params.validate()?;
        require_inscribed(source_size, params)?;

        let grid = EquirectGrid::new(target_size.0, target_size.1, params.field_of_view);
        let rotation = params.rotation();
        Ok(Self::build(source_size, target_size, |x, y| {
            let mut ray = grid.direction(x as f64, y as f64);
            if let Some(rotation) = rotation {
                ray = rotation * ray;
            }
            params.project_ray(&ray)
        }))
    }

    pub fn equirectangular_to_fisheye(
        source_size: (u32, u32),
        target_size: (u32, u32),
        params: &ProjectionParams,
    ) -> Result<Self> {
        require_non_empty(source_size, "equirectangular source")?;
        require_square(target_size, "fisheye target")?;
        params.validate()?;
        require_inscribed(target_size, params)?;

        let grid = EquirectGrid::new(source_size.0, source_size.1, params.field_of_view);
        let inverse = params.rotation().map(|r| r.transpose());
        Ok(Self::build(source_size, target_size, |x, y| {
            let mut ray = params.unproject_pixel(x as f64, y as f64)?;
            if let Some(inverse) = inverse {
                ray = inverse * ray;
            }
            grid.pixel(&ray)
        }))
    }

    pub fn perspective(
        source_size: (u32, u32),
        target_size: (u32, u32),
        params: &ProjectionParams,
        focal_length: f64,
    ) -> Result<Self> {
        require_square(source_size, "fisheye source")?;
        require_non_empty(target_size, "perspective target")?;
        params.validate()?;
        require_inscribed(source_size, params)?;
        if !focal_length.is_finite() || focal_length <= 0.0 {
            return Err(PanoError::PreconditionViolation(format!(
                "virtual focal length {focal_length} must be positive"
            )));
        }

        let half_w = target_size.0 as f64 * 0.5;
        let half_h = target_size.1 as f64 * 0.5;
        let rotation = params.rotation();
        Ok(Self::build(source_size, target_size, |x, y| {
            let mut ray =
                Vector3::new(x as f64 - half_w, half_h - y as f64, focal_length).normalize();
            if let Some(rotation) = rotation {
                ray = rotation * ray;
            }
            params.project_ray(&ray)
        }))
    }

    /// Remaps a circle recorded through a `lens_fov` lens so that the narrower
    /// `params.field_of_view` fills the whole radius.
    pub fn fisheye_shrink(
        size: (u32, u32),
        params: &ProjectionParams,
        lens_fov: f64,
    ) -> Result<Self> {
        require_square(size, "fisheye image")?;
        params.validate()?;
        require_inscribed(size, params)?;
        if lens_fov < params.field_of_view {
            return Err(PanoError::PreconditionViolation(format!(
                "lens field of view {lens_fov} is narrower than the target {}",
                params.field_of_view
            )));
        }
        let lens = ProjectionParams {
            field_of_view: lens_fov,
            ..*params
        };
        lens.validate()?;

        Ok(Self::build(size, size, |x, y| {
            let ray = params.unproject_pixel(x as f64, y as f64)?;
            lens.project_ray(&ray)
        }))
    }

    fn build<F>(source_size: (u32, u32), size: (u32, u32), lookup: F) -> Self
    where
        F: Fn(u32, u32) -> Option<(f64, f64)>,
    {
        let max_u = source_size.0 as f64 - 1.0;
        let max_v = source_size.1 as f64 - 1.0;
        let mut coords = Vec::with_capacity(size.0 as usize * size.1 as usize);
        for y in 0..size.1 {
            for x in 0..size.0 {
                let entry = lookup(x, y)
                    .filter(|&(u, v)| u >= 0.0 && v >= 0.0 && u <= max_u && v <= max_v)
                    .map(|(u, v)| (u as f32, v as f32));
                coords.push(entry);
            }
        }
        Self {
            size,
            source_size,
            coords,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    /// Source coordinate for a destination pixel.
    pub fn lookup(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.size.0 || y >= self.size.1 {
            return None;
        }
        self.coords[(y * self.size.0 + x) as usize]
    }

    /// Fraction of destination pixels that receive a sample.
    pub fn coverage(&self) -> f64 {
        if self.coords.is_empty() {
            return 0.0;
        }
        self.coords.iter().filter(|c| c.is_some()).count() as f64 / self.coords.len() as f64
    }

    /// Writes every mapped destination pixel; unmapped pixels keep their value.
    pub fn apply(&self, src: &RgbImage, dst: &mut RgbImage, interpolation: Interpolation) -> Result<()> {
        if src.dimensions() != self.source_size || dst.dimensions() != self.size {
            return Err(PanoError::PreconditionViolation(format!(
                "map built for {:?} -> {:?}, got {:?} -> {:?}",
                self.source_size,
                self.size,
                src.dimensions(),
                dst.dimensions()
            )));
        }

        let width = self.size.0;
        for (index, entry) in self.coords.iter().enumerate() {
            let Some((u, v)) = *entry else {
                continue;
            };
            let pixel = match interpolation {
                Interpolation::Nearest => nearest_sample_rgb(src, u, v),
                Interpolation::Bilinear => bilinear_sample_rgb(src, u, v),
            };
            if let Some(pixel) = pixel {
                let x = index as u32 % width;
                let y = index as u32 / width;
                dst.put_pixel(x, y, pixel);
            }
        }
        Ok(())
    }
}

/// Fills `dst` with the equirectangular view of the fisheye circle in `src`.
/// Pixels whose ray leaves the circle are left untouched.
pub fn fisheye_to_equirectangular(
    src: &RgbImage,
    dst: &mut RgbImage,
    params: &ProjectionParams,
) -> Result<()> {
    let map = ProjectionMap::fisheye_to_equirectangular(src.dimensions(), dst.dimensions(), params)?;
    map.apply(src, dst, params.interpolation)
}

/// Inverse of [`fisheye_to_equirectangular`]; `params` describes the fisheye target.
pub fn equirectangular_to_fisheye(
    src: &RgbImage,
    dst: &mut RgbImage,
    params: &ProjectionParams,
) -> Result<()> {
    let map = ProjectionMap::equirectangular_to_fisheye(src.dimensions(), dst.dimensions(), params)?;
    map.apply(src, dst, params.interpolation)
}

/// Renders the fisheye through a virtual pinhole camera with the given focal length.
pub fn perspective_fisheye_correct(
    src: &RgbImage,
    dst: &mut RgbImage,
    params: &ProjectionParams,
    focal_length: f64,
) -> Result<()> {
    let map = ProjectionMap::perspective(src.dimensions(), dst.dimensions(), params, focal_length)?;
    map.apply(src, dst, params.interpolation)
}

pub fn shrink_fisheye_circle(
    src: &RgbImage,
    dst: &mut RgbImage,
    params: &ProjectionParams,
    lens_fov: f64,
) -> Result<()> {
    if src.dimensions() != dst.dimensions() {
        return Err(PanoError::PreconditionViolation(
            "shrink source and target must have the same size".to_string(),
        ));
    }
    let map = ProjectionMap::fisheye_shrink(src.dimensions(), params, lens_fov)?;
    map.apply(src, dst, params.interpolation)
}

fn require_square(size: (u32, u32), what: &str) -> Result<()> {
    require_non_empty(size, what)?;
    if size.0 != size.1 {
        return Err(PanoError::PreconditionViolation(format!(
            "{what} must be square, got {}x{}",
            size.0, size.1
        )));
    }
    Ok(())
}

/// The circle must touch all four sides of the square; odd sides allow one pixel of slack.
fn require_inscribed(size: (u32, u32), params: &ProjectionParams) -> Result<()> {
    let half = size.0 as f64 * 0.5;
    let off = |value: u32| (value as f64 - half).abs() > 1.0;
    if off(params.radius) || off(params.center.0) || off(params.center.1) {
        return Err(PanoError::PreconditionViolation(format!(
            "circle at {:?} radius {} is not inscribed in the {}x{} square",
            params.center, params.radius, size.0, size.1
        )));
    }
    Ok(())
}

fn require_non_empty(size: (u32, u32), what: &str) -> Result<()> {
    if size.0 == 0 || size.1 == 0 {
        return Err(PanoError::PreconditionViolation(format!(
            "{what} must be non-empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn gradient_fisheye(size: u32) -> RgbImage {
        let scale = 255.0 / (size - 1) as f64;
        RgbImage::from_fn(size, size, |x, y| {
            Rgb([
                (x as f64 * scale).round() as u8,
                (y as f64 * scale).round() as u8,
                128,
            ])
        })
    }

    #[test]
    fn azimuth_tie_breaks_are_exact() {
        assert_eq!(azimuth(0.0, 0.0), 0.0);
        assert_eq!(azimuth(0.0, 3.0), FRAC_PI_2);
        assert_eq!(azimuth(0.0, -3.0), 3.0 * FRAC_PI_2);
        assert_relative_eq!(azimuth(2.0, 0.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(azimuth(-2.0, 0.0), PI, epsilon = 1e-12);
        assert_relative_eq!(azimuth(1.0, 1.0), PI / 4.0, epsilon = 1e-12);
        assert_relative_eq!(azimuth(1.0, -1.0), -PI / 4.0, epsilon = 1e-12);
        assert_relative_eq!(azimuth(-1.0, 1.0), 3.0 * PI / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn equidistant_focal_places_half_fov_on_circle() {
        let params = ProjectionParams::new((500, 500), 500, 95f64.to_radians());
        assert_relative_eq!(
            params.focal(),
            500.0 / (95f64.to_radians() * 0.5),
            epsilon = 1e-9
        );

        let axis = params.project_ray(&Vector3::z()).unwrap();
        assert_relative_eq!(axis.0, 500.0, epsilon = 1e-9);
        assert_relative_eq!(axis.1, 500.0, epsilon = 1e-9);
    }

    #[test]
    fn every_mapping_round_trips_through_the_lens() {
        for mapping in [
            DistanceMapping::Equidistant,
            DistanceMapping::Equisolid,
            DistanceMapping::Orthographic,
            DistanceMapping::Stereographic,
        ] {
            let params = ProjectionParams::new((100, 100), 100, 170f64.to_radians())
                .with_mapping(mapping);
            let ray = params.unproject_pixel(140.0, 70.0).unwrap();
            let (u, v) = params.project_ray(&ray).unwrap();
            assert_relative_eq!(u, 140.0, epsilon = 1e-6);
            assert_relative_eq!(v, 70.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn fisheye_equirect_round_trip_is_near_identity() {
        let params = ProjectionParams::new((100, 100), 100, PI);
        let src = gradient_fisheye(201);
        let mut equirect = RgbImage::new(360, 360);
        fisheye_to_equirectangular(&src, &mut equirect, &params).unwrap();

        let inverse = ProjectionMap::equirectangular_to_fisheye((360, 360), (201, 201), &params).unwrap();
        let mut back = RgbImage::new(201, 201);
        inverse.apply(&equirect, &mut back, params.interpolation).unwrap();

        // Rays on the rim can land on the outermost half pixel of the canvas.
        let rim = params.radius as f64 - 1.0;
        let mut max_error = 0i32;
        let mut max_rim_error = 0i32;
        for y in 0..201u32 {
            for x in 0..201u32 {
                let rho = (x as f64 - 100.0).hypot(y as f64 - 100.0);
                if rho > params.radius as f64 {
                    continue;
                }
                if inverse.lookup(x, y).is_none() {
                    assert!(rho > rim, "pixel ({x}, {y}) inside the circle was not mapped");
                    continue;
                }
                let a = src.get_pixel(x, y);
                let b = back.get_pixel(x, y);
                let error = (0..3)
                    .map(|c| (a[c] as i32 - b[c] as i32).abs())
                    .max()
                    .unwrap_or(0);
                if rho > rim {
                    max_rim_error = max_rim_error.max(error);
                } else {
                    max_error = max_error.max(error);
                }
            }
        }
        assert!(max_error <= 6, "round trip error {max_error}");
        assert!(max_rim_error <= 16, "round trip error on the rim {max_rim_error}");
    }

    #[test]
    fn random_pixels_round_trip_through_every_mapping() {
        let mut rng = StdRng::seed_from_u64(11);
        for mapping in [
            DistanceMapping::Equidistant,
            DistanceMapping::Equisolid,
            DistanceMapping::Stereographic,
        ] {
            let params = ProjectionParams::new((100, 100), 100, 200f64.to_radians())
                .with_mapping(mapping);
            for _ in 0..200 {
                let rho = 99.5 * rng.random::<f64>().sqrt();
                let phi = rng.random_range(0.0..TAU);
                let (u, v) = (100.0 + rho * phi.cos(), 100.0 - rho * phi.sin());
                let ray = params.unproject_pixel(u, v).unwrap();
                let (u2, v2) = params.project_ray(&ray).unwrap();
                assert_relative_eq!(u2, u, epsilon = 1e-6);
                assert_relative_eq!(v2, v, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn rays_outside_the_circle_leave_target_untouched() {
        let params = ProjectionParams::new((50, 50), 50, 120f64.to_radians());
        let src = RgbImage::from_pixel(101, 101, Rgb([200, 200, 200]));
        let marker = Rgb([1, 2, 3]);
        let mut dst = RgbImage::from_pixel(64, 64, marker);
        fisheye_to_equirectangular(&src, &mut dst, &params).unwrap();

        // Corners sit at the diagonal, beyond half the field of view.
        assert_eq!(*dst.get_pixel(0, 0), marker);
        assert_eq!(*dst.get_pixel(63, 63), marker);
        assert_eq!(*dst.get_pixel(32, 32), Rgb([200, 200, 200]));
    }

    #[test]
    fn wider_field_of_view_spans_more_longitude() {
        let narrow = EquirectGrid::new(128, 128, 90f64.to_radians());
        let wide = EquirectGrid::new(128, 128, 180f64.to_radians());
        assert!(wide.angular_span() > narrow.angular_span());

        // A fixed off-axis ray moves toward the canvas center as the span grows.
        let ray = Vector3::new(0.5f64.sin(), 0.0, 0.5f64.cos());
        let (x_narrow, _) = narrow.pixel(&ray).unwrap();
        let (x_wide, _) = wide.pixel(&ray).unwrap();
        assert!(x_wide < x_narrow);
        assert!(x_wide > 63.5);
    }

    #[test]
    fn non_square_source_is_rejected() {
        let params = ProjectionParams::new((50, 50), 50, PI);
        let src = RgbImage::new(100, 80);
        let mut dst = RgbImage::new(64, 64);
        let err = fisheye_to_equirectangular(&src, &mut dst, &params).unwrap_err();
        assert!(matches!(err, PanoError::PreconditionViolation(_)));

        let src = RgbImage::new(100, 100);
        let mut empty = RgbImage::new(0, 0);
        let err = fisheye_to_equirectangular(&src, &mut empty, &params).unwrap_err();
        assert!(matches!(err, PanoError::PreconditionViolation(_)));
    }

    #[test]
    fn circle_must_be_inscribed_in_the_square() {
        let params = ProjectionParams::new((500, 500), 500, 95f64.to_radians());
        let src = RgbImage::new(100, 100);
        let mut dst = RgbImage::new(64, 64);
        let err = fisheye_to_equirectangular(&src, &mut dst, &params).unwrap_err();
        assert!(matches!(err, PanoError::PreconditionViolation(_)));

        let mut fisheye = RgbImage::new(100, 100);
        assert!(equirectangular_to_fisheye(&dst, &mut fisheye, &params).is_err());
        assert!(ProjectionMap::perspective((100, 100), (32, 32), &params, 40.0).is_err());
        assert!(ProjectionMap::fisheye_shrink((100, 100), &params, PI).is_err());

        let off_center = ProjectionParams::new((40, 50), 50, 95f64.to_radians());
        assert!(ProjectionMap::fisheye_to_equirectangular((100, 100), (64, 64), &off_center).is_err());

        // Odd sides: the center sits half a pixel off either way.
        for center in [50, 51] {
            let params = ProjectionParams::new((center, center), 50, 95f64.to_radians());
            assert!(ProjectionMap::fisheye_to_equirectangular((101, 101), (64, 64), &params).is_ok());
        }
    }

    #[test]
    fn perspective_center_looks_down_the_axis() {
        let params = ProjectionParams::new((100, 100), 100, PI);
        let map = ProjectionMap::perspective((201, 201), (80, 60), &params, 40.0).unwrap();
        let (u, v) = map.lookup(40, 30).unwrap();
        assert_relative_eq!(u, 100.0, epsilon = 1e-4);
        assert_relative_eq!(v, 100.0, epsilon = 1e-4);

        let turned = params.with_orientation(Orientation {
            roll: 0.0,
            pitch: 0.3,
            yaw: 0.0,
        });
        let map = ProjectionMap::perspective((201, 201), (80, 60), &turned, 40.0).unwrap();
        let (u, _) = map.lookup(40, 30).unwrap();
        assert!((u - 100.0).abs() > 5.0);
    }

    #[test]
    fn shrink_pulls_target_edge_inside_lens_circle() {
        let params = ProjectionParams::new((100, 100), 100, 200f64.to_radians());
        let map = ProjectionMap::fisheye_shrink((201, 201), &params, 235f64.to_radians()).unwrap();

        let (u, v) = map.lookup(100, 100).unwrap();
        assert_relative_eq!(u, 100.0, epsilon = 1e-4);
        assert_relative_eq!(v, 100.0, epsilon = 1e-4);

        let (u, _) = map.lookup(200, 100).unwrap();
        assert_relative_eq!(u as f64, 100.0 + 100.0 * 200.0 / 235.0, epsilon = 1e-3);
    }
}
