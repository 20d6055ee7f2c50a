use image::{GrayImage, Luma, RgbImage};
use nalgebra::Vector3;
use panofish_core::calib::WarpProjectorState;
use panofish_core::contracts::WarpedView;
use panofish_core::img::image_utils::{almost_black, bilinear_sample_rgb};
use panofish_core::{PanoError, Result};

/// Cylinder coordinates of an image pixel.
pub fn map_forward(state: &WarpProjectorState, x: f64, y: f64) -> (f64, f64) {
    let ray = state.r_kinv * Vector3::new(x, y, 1.0);
    let u = state.scale * ray.x.atan2(ray.z);
    let v = state.scale * ray.y / ray.x.hypot(ray.z);
    (u, v)
}

/// Image pixel seen at cylinder coordinates, `None` behind the camera.
pub fn map_backward(state: &WarpProjectorState, u: f64, v: f64) -> Option<(f64, f64)> {
    let angle = u / state.scale;
    let height = v / state.scale;
    let ray = Vector3::new(angle.sin(), height, angle.cos());
    let p = state.k_rinv * ray;
    if p.z <= 0.0 {
        return None;
    }
    Some((p.x / p.z, p.y / p.z))
}

/// Cylinder-space bounding box `(u0, v0, u1, v1)` of the image border.
fn detect_roi(state: &WarpProjectorState, width: u32, height: u32) -> (i32, i32, i32, i32) {
    let (mut u0, mut v0) = (f64::INFINITY, f64::INFINITY);
    let (mut u1, mut v1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    let mut visit = |x: f64, y: f64| {
        let (u, v) = map_forward(state, x, y);
        u0 = u0.min(u);
        v0 = v0.min(v);
        u1 = u1.max(u);
        v1 = v1.max(v);
    };
    let w = width as f64 - 1.0;
    let h = height as f64 - 1.0;
    for x in 0..width {
        visit(x as f64, 0.0);
        visit(x as f64, h);
    }
    for y in 0..height {
        visit(0.0, y as f64);
        visit(w, y as f64);
    }
    (
        u0.floor() as i32,
        v0.floor() as i32,
        u1.ceil() as i32,
        v1.ceil() as i32,
    )
}

/// Projects `image` onto the shared cylinder. Border black is left out of the mask.
pub fn warp_cylindrical(image: &RgbImage, state: &WarpProjectorState) -> Result<WarpedView> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PanoError::PreconditionViolation(
            "cannot warp an empty image".to_string(),
        ));
    }
    if !state.scale.is_finite() || state.scale <= 0.0 {
        return Err(PanoError::DegenerateCalibration(format!(
            "warp scale {} is not positive",
            state.scale
        )));
    }

    let (u0, v0, u1, v1) = detect_roi(state, width, height);
    let out_w = (u1 - u0 + 1).max(1) as u32;
    let out_h = (v1 - v0 + 1).max(1) as u32;
    if out_w > width.saturating_mul(8) || out_h > height.saturating_mul(8) {
        return Err(PanoError::DegenerateCalibration(format!(
            "warped view {out_w}x{out_h} is implausibly large for a {width}x{height} image"
        )));
    }

    let mut warped = RgbImage::new(out_w, out_h);
    let mut mask = GrayImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let u = (u0 + x as i32) as f64;
            let v = (v0 + y as i32) as f64;
            let Some((sx, sy)) = map_backward(state, u, v) else {
                continue;
            };
            if let Some(pixel) = bilinear_sample_rgb(image, sx as f32, sy as f32)
                && !almost_black(&pixel)
            {
                warped.put_pixel(x, y, pixel);
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }

    Ok(WarpedView::new(warped, mask, (u0, v0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;
    use panofish_core::calib::CameraParams;
    use panofish_core::math::rotation_about_y;

    fn state(yaw: f64) -> WarpProjectorState {
        let camera = CameraParams::new(rotation_about_y(yaw), 200.0, 100.0, 75.0);
        WarpProjectorState::for_camera(&camera, 200.0).unwrap()
    }

    #[test]
    fn forward_and_backward_agree() {
        let state = state(0.3);
        let (u, v) = map_forward(&state, 40.0, 120.0);
        let (x, y) = map_backward(&state, u, v).unwrap();
        assert_relative_eq!(x, 40.0, epsilon = 1e-9);
        assert_relative_eq!(y, 120.0, epsilon = 1e-9);
    }

    #[test]
    fn yaw_shifts_the_view_along_the_cylinder() {
        let image = RgbImage::from_pixel(200, 150, Rgb([120, 80, 40]));
        let center = warp_cylindrical(&image, &state(0.0)).unwrap();
        let turned = warp_cylindrical(&image, &state(0.25)).unwrap();

        assert_eq!(turned.corner.0 - center.corner.0, 50);
        assert_eq!(center.corner.1, turned.corner.1);
        assert_eq!(center.mask.get_pixel(center.image.width() / 2, center.image.height() / 2)[0], 255);
    }
}
