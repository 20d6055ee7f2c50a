use std::cmp::Ordering;

use image::RgbImage;
use log::debug;
use panofish_core::calib::{CalibrationSnapshot, SnapshotGroup};
use panofish_core::contracts::VisionBackend;
use panofish_core::img::{MaskRatio, PixelRect, crop, split_columns, unsharp_mask};
use panofish_core::logs::StitchStage;
use panofish_core::{PanoError, Result};

use crate::stitcher::{PassOutcome, PassOutput, StitchParams, compose};

/// Share of each one-sided panorama expected to overlap its mirror pass.
pub const DOUBLE_SIDE_OVERLAP: f64 = 0.25;

/// Number of stitch passes the double-sided policy runs per frame.
pub const DOUBLE_SIDE_PASSES: usize = 4;

/// Blend strength of the forward and backward passes, whatever the stream uses.
pub const DOUBLE_SIDE_BLEND_STRENGTH: f32 = 4.0;

/// Stitch settings of one double-sided pass.
///
/// Passes 0 and 1 stitch the raw views, pass 2 the central bands with a hard
/// cut and pass 3 the swapped halves with a light blend. The last two share the
/// widened overlap mask.
fn pass_params(params: &StitchParams, pass: usize) -> StitchParams {
    let band_mask = MaskRatio::new(DOUBLE_SIDE_OVERLAP * 1.05, 0.7);
    match pass {
        0 | 1 => StitchParams {
            blend_strength: DOUBLE_SIDE_BLEND_STRENGTH,
            ..*params
        },
        2 => StitchParams {
            mask_ratio: band_mask,
            blend_strength: 0.0,
            ..*params
        },
        _ => StitchParams {
            mask_ratio: band_mask,
            blend_strength: 1.0,
            ..*params
        },
    }
}

#[derive(Debug, Clone)]
pub enum GroupOutcome {
    Composed {
        output: PassOutput,
        group: SnapshotGroup,
        stages: Vec<StitchStage>,
    },
    Degenerate {
        group: SnapshotGroup,
    },
}

fn content_order(a: &RgbImage, b: &RgbImage) -> Ordering {
    a.dimensions()
        .cmp(&b.dimensions())
        .then_with(|| a.as_raw().cmp(b.as_raw()))
}

fn central_band(image: &RgbImage) -> Result<RgbImage> {
    let ratio = 1.0 / (4.0 * (1.0 - DOUBLE_SIDE_OVERLAP));
    let width = image.width() as f64;
    let start = ((0.5 - ratio) * width).round().max(0.0) as u32;
    let end = (((0.5 + ratio) * width).round() as u32).min(image.width());
    if end <= start {
        return Err(PanoError::PreconditionViolation(format!(
            "panorama {}x{} too narrow for a central band",
            image.width(),
            image.height()
        )));
    }
    crop(image, PixelRect::new(start, 0, end - start, image.height()))
}

/// Forward-Backward-Forward recombination.
///
/// Stitches the views forward and reversed, orders the two panoramas by content,
/// re-stitches their central bands and finally wraps the result by swapping halves.
/// Swapping the two input views does not change the output.
pub fn compose_double_sided(
    backend: &dyn VisionBackend,
    params: &StitchParams,
    images: &[RgbImage],
    reuse: Option<&SnapshotGroup>,
) -> Result<GroupOutcome> {
    if let Some(group) = reuse
        && group.len() != DOUBLE_SIDE_PASSES
    {
        return Err(PanoError::SnapshotMismatch {
            left: group.len(),
            right: DOUBLE_SIDE_PASSES,
        });
    }
    let reused = |pass: usize| reuse.and_then(|g| g.pass(pass));
    let mut snapshots: Vec<CalibrationSnapshot> = Vec::with_capacity(DOUBLE_SIDE_PASSES);
    let mut stages = Vec::new();

    let mut run = |images: &[RgbImage],
                   pass: usize,
                   snapshots: &mut Vec<CalibrationSnapshot>|
     -> Result<Option<PassOutput>> {
        match compose(backend, &pass_params(params, pass), images, reused(pass))? {
            PassOutcome::Composed(output) => {
                snapshots.push(output.snapshot.clone());
                stages.extend(output.stages.iter().copied());
                Ok(Some(output))
            }
            PassOutcome::Degenerate { snapshot } => {
                debug!("double-sided pass {pass} degenerate");
                snapshots.push(snapshot);
                Ok(None)
            }
        }
    };

    let Some(forward) = run(images, 0, &mut snapshots)? else {
        return Ok(degenerate(snapshots));
    };
    let reversed: Vec<RgbImage> = images.iter().rev().cloned().collect();
    let Some(backward) = run(&reversed, 1, &mut snapshots)? else {
        return Ok(degenerate(snapshots));
    };

    let bf = unsharp_mask(&forward.image);
    let fb = unsharp_mask(&backward.image);
    let (first, second) = match content_order(&fb, &bf) {
        Ordering::Greater => (bf, fb),
        _ => (fb, bf),
    };

    let bands = vec![central_band(&first)?, central_band(&second)?];
    let Some(fbf) = run(&bands, 2, &mut snapshots)? else {
        return Ok(degenerate(snapshots));
    };

    let fbf = unsharp_mask(&fbf.image);
    let (left, right) = split_columns(&fbf, fbf.width() / 2)?;
    let Some(output) = run(&[right, left], 3, &mut snapshots)? else {
        return Ok(degenerate(snapshots));
    };

    Ok(GroupOutcome::Composed {
        output,
        group: SnapshotGroup::new(snapshots),
        stages,
    })
}

fn degenerate(mut snapshots: Vec<CalibrationSnapshot>) -> GroupOutcome {
    for snapshot in &mut snapshots {
        snapshot.rejected = true;
    }
    GroupOutcome::Degenerate {
        group: SnapshotGroup::new(snapshots),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn central_band_keeps_two_thirds() {
        let image = RgbImage::from_fn(600, 10, |x, _| Rgb([(x / 3) as u8, 0, 0]));
        let band = central_band(&image).unwrap();
        assert_eq!(band.width(), 400);
        assert_eq!(band.get_pixel(0, 0)[0], 33);
    }

    #[test]
    fn central_band_rounds_both_bounds() {
        let image = RgbImage::new(601, 4);
        let band = central_band(&image).unwrap();
        // 100.17 and 500.83 round to columns 100 and 501.
        assert_eq!(band.width(), 401);
    }

    #[test]
    fn passes_use_their_own_mask_and_blend() {
        let stream = StitchParams {
            mask_ratio: MaskRatio::new(0.4, 0.9),
            blend_strength: 7.0,
            ..StitchParams::default()
        };
        for pass in [0, 1] {
            let forward = pass_params(&stream, pass);
            assert_eq!(forward.blend_strength, DOUBLE_SIDE_BLEND_STRENGTH);
            assert_eq!(forward.mask_ratio, stream.mask_ratio);
        }

        let band = pass_params(&stream, 2);
        let wrap = pass_params(&stream, 3);
        assert_eq!(band.blend_strength, 0.0);
        assert_eq!(wrap.blend_strength, 1.0);
        assert_eq!(wrap.mask_ratio, band.mask_ratio);
        assert!((band.mask_ratio.width - 0.2625).abs() < 1e-12);
        assert!((band.mask_ratio.height - 0.7).abs() < 1e-12);
        assert_eq!(wrap.work_megapix, stream.work_megapix);
    }

    #[test]
    fn content_order_is_total() {
        let dark = RgbImage::from_pixel(4, 4, Rgb([1, 1, 1]));
        let light = RgbImage::from_pixel(4, 4, Rgb([9, 9, 9]));
        assert_eq!(content_order(&dark, &light), Ordering::Less);
        assert_eq!(content_order(&light, &dark), Ordering::Greater);
        assert_eq!(content_order(&dark, &dark.clone()), Ordering::Equal);
    }
}
