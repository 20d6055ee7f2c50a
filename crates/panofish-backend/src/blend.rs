use image::{Luma, Rgb, RgbImage};
use panofish_core::contracts::{BackendError, WarpedView};

const ORPHAN_WEIGHT: f32 = 1e-6;

/// Canvas origin and size covering every view.
pub fn canvas_bounds(views: &[WarpedView]) -> Option<((i32, i32), (u32, u32))> {
    let left = views.iter().map(|v| v.corner.0).min()?;
    let top = views.iter().map(|v| v.corner.1).min()?;
    let right = views.iter().map(|v| v.right()).max()?;
    let bottom = views.iter().map(|v| v.bottom()).max()?;
    Some(((left, top), ((right - left) as u32, (bottom - top) as u32)))
}

/// Canvas columns `[first, last]` where a view has valid pixels.
fn mask_extent(view: &WarpedView) -> Option<(i32, i32)> {
    let (w, h) = view.mask.dimensions();
    let column_used = |x: u32| (0..h).any(|y| view.mask.get_pixel(x, y)[0] > 0);
    let first = (0..w).find(|&x| column_used(x))?;
    let last = (first..w).rev().find(|&x| column_used(x)).unwrap_or(first);
    Some((view.corner.0 + first as i32, view.corner.0 + last as i32))
}

/// Splits every horizontal overlap at its middle column.
///
/// Views are visited left to right; each one gives up the columns past the seam to
/// its right-hand neighbour.
pub fn vertical_midline_seams(views: &mut [WarpedView]) {
    let mut order: Vec<(usize, (i32, i32))> = views
        .iter()
        .enumerate()
        .filter_map(|(i, v)| mask_extent(v).map(|e| (i, e)))
        .collect();
    order.sort_by_key(|&(_, (first, last))| (first, last));

    for pair in order.windows(2) {
        let (left_idx, (_, left_last)) = pair[0];
        let (right_idx, (right_first, _)) = pair[1];
        if right_first > left_last {
            continue;
        }
        let seam = (right_first + left_last + 1) / 2;

        let left = &mut views[left_idx];
        let (lw, lh) = left.seam_mask.dimensions();
        for x in 0..lw {
            if left.corner.0 + x as i32 >= seam {
                for y in 0..lh {
                    left.seam_mask.put_pixel(x, y, Luma([0]));
                }
            }
        }

        let right = &mut views[right_idx];
        let (rw, rh) = right.seam_mask.dimensions();
        for x in 0..rw {
            if right.corner.0 + (x as i32) < seam {
                for y in 0..rh {
                    right.seam_mask.put_pixel(x, y, Luma([0]));
                }
            }
        }
    }
}

/// Signed horizontal distance to the ownership boundary along one mask row.
/// Positive inside the owned span, negative outside, `-inf` when the row owns nothing.
fn signed_row_distance(owned: &[bool]) -> Vec<f32> {
    let n = owned.len();
    let mut to_owned = vec![f32::INFINITY; n];
    let mut to_free = vec![f32::INFINITY; n];

    let mut last_owned: Option<usize> = None;
    let mut last_free: Option<usize> = None;
    for x in 0..n {
        if owned[x] {
            last_owned = Some(x);
        } else {
            last_free = Some(x);
        }
        to_owned[x] = last_owned.map_or(f32::INFINITY, |o| (x - o) as f32);
        // Outside the row counts as not owned.
        to_free[x] = last_free.map_or((x + 1) as f32, |f| (x - f) as f32);
    }
    last_owned = None;
    last_free = None;
    for x in (0..n).rev() {
        if owned[x] {
            last_owned = Some(x);
        } else {
            last_free = Some(x);
        }
        to_owned[x] = to_owned[x].min(last_owned.map_or(f32::INFINITY, |o| (o - x) as f32));
        to_free[x] = to_free[x].min(last_free.map_or((n - x) as f32, |f| (f - x) as f32));
    }

    (0..n)
        .map(|x| if owned[x] { to_free[x] } else { -to_owned[x] })
        .collect()
}

/// Feathers views across their seams over `sqrt(area) * strength / 100` pixels.
pub fn feather_blend(views: &[WarpedView], strength: f32) -> Result<RgbImage, BackendError> {
    let ((left, top), (width, height)) =
        canvas_bounds(views).ok_or_else(|| BackendError::Blend("no views to blend".to_string()))?;
    if width == 0 || height == 0 {
        return Err(BackendError::Blend("views cover an empty canvas".to_string()));
    }
    let blend_width = ((width as f32 * height as f32).sqrt() * strength / 100.0).max(0.0);
    let feather = blend_width >= 1.0;

    let mut accum = vec![[0f32; 4]; width as usize * height as usize];
    for view in views {
        let (vw, vh) = view.image.dimensions();
        for y in 0..vh {
            let owned: Vec<bool> = (0..vw)
                .map(|x| view.seam_mask.get_pixel(x, y)[0] > 0)
                .collect();
            let distance = if feather { signed_row_distance(&owned) } else { Vec::new() };
            for x in 0..vw {
                if view.mask.get_pixel(x, y)[0] == 0 {
                    continue;
                }
                // Valid pixels keep a tiny weight so unowned content still fills holes.
                let weight = if feather {
                    (0.5 + distance[x as usize] / blend_width).clamp(ORPHAN_WEIGHT, 1.0)
                } else if owned[x as usize] {
                    1.0
                } else {
                    ORPHAN_WEIGHT
                };
                let cx = (view.corner.0 - left) as u32 + x;
                let cy = (view.corner.1 - top) as u32 + y;
                let pixel = view.image.get_pixel(x, y);
                let slot = &mut accum[(cy * width + cx) as usize];
                for c in 0..3 {
                    slot[c] += weight * pixel[c] as f32;
                }
                slot[3] += weight;
            }
        }
    }

    let mut out = RgbImage::new(width, height);
    for (index, slot) in accum.iter().enumerate() {
        if slot[3] <= 0.0 {
            continue;
        }
        let x = index as u32 % width;
        let y = index as u32 / width;
        let px = [0, 1, 2].map(|c| (slot[c] / slot[3]).round().clamp(0.0, 255.0) as u8);
        out.put_pixel(x, y, Rgb(px));
    }
    Ok(out)
}
