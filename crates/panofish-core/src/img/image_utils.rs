use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;

use crate::errors::{PanoError, Result};
use crate::img::PixelRect;

/// Squared-intensity threshold below which a pixel counts as border black.
pub const BLACK_TOLERANCE: u32 = 3;

const SHARPEN_SIGMA: f32 = 3.0;
const SHARPEN_AMOUNT: f32 = 1.5;

pub fn bilinear_sample_rgb(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    if x < 0.0 || y < 0.0 {
        return None;
    }
    let w = img.width() as f32;
    let h = img.height() as f32;
    if x > w - 1.0 || y > h - 1.0 {
        return None;
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(img.width() - 1);
    let y1 = (y0 + 1).min(img.height() - 1);

    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 + dx * (p10[c] as f32 - p00[c] as f32);
        let bot = p01[c] as f32 + dx * (p11[c] as f32 - p01[c] as f32);
        out[c] = (top + dy * (bot - top)).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

pub fn nearest_sample_rgb(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let u = x.round();
    let v = y.round();
    if u < 0.0 || v < 0.0 || u >= img.width() as f32 || v >= img.height() as f32 {
        return None;
    }
    Some(*img.get_pixel(u as u32, v as u32))
}

/// True when the squared channel magnitude is within `(3·BLACK_TOLERANCE)²`.
pub fn almost_black(pixel: &Rgb<u8>) -> bool {
    let [r, g, b] = pixel.0.map(u32::from);
    r * r + g * g + b * b <= (3 * BLACK_TOLERANCE).pow(2)
}

/// Fraction of pixels that are not near-black.
pub fn non_black_ratio(img: &RgbImage) -> f64 {
    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let lit = img.pixels().filter(|p| !almost_black(p)).count() as u64;
    lit as f64 / total as f64
}

/// Sharpens by subtracting a wide gaussian blur: `1.5·img − 0.5·blur`.
pub fn unsharp_mask(img: &RgbImage) -> RgbImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let blurred = gaussian_blur_f32(img, SHARPEN_SIGMA);
    let mut out = img.clone();
    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let value = SHARPEN_AMOUNT * dst[c] as f32 - (SHARPEN_AMOUNT - 1.0) * soft[c] as f32;
            dst[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

pub fn crop(img: &RgbImage, rect: PixelRect) -> Result<RgbImage> {
    if rect.is_empty() || rect.right() > img.width() || rect.bottom() > img.height() {
        return Err(PanoError::PreconditionViolation(format!(
            "crop {rect:?} outside {}x{} image",
            img.width(),
            img.height()
        )));
    }
    Ok(imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image())
}

pub fn resize_exact(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Splits into `[0, at)` and `[at, width)` column blocks.
pub fn split_columns(img: &RgbImage, at: u32) -> Result<(RgbImage, RgbImage)> {
    if at == 0 || at >= img.width() {
        return Err(PanoError::PreconditionViolation(format!(
            "split column {at} outside (0, {})",
            img.width()
        )));
    }
    let left = crop(img, PixelRect::new(0, 0, at, img.height()))?;
    let right = crop(img, PixelRect::new(at, 0, img.width() - at, img.height()))?;
    Ok((left, right))
}
