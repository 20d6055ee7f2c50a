use image::{GrayImage, RgbImage};
use imageproc::corners::corners_fast9;
use panofish_core::contracts::{FeatureMatch, ImageFeatures, Keypoint};
use panofish_core::img::PixelRect;
use panofish_core::img::image_utils::BLACK_TOLERANCE;

/// FAST-9 corners inside the search regions, each described by a normalized patch.
///
/// Patches touching near-black pixels are skipped so the fisheye circle edge never
/// produces features.
pub fn detect_and_describe(
    image: &RgbImage,
    image_index: usize,
    rois: &[PixelRect],
    threshold: u8,
    patch_radius: u32,
    max_features: usize,
) -> ImageFeatures {
    let gray = image::imageops::grayscale(image);
    let (width, height) = gray.dimensions();

    let mut corners: Vec<_> = corners_fast9(&gray, threshold)
        .into_iter()
        .filter(|c| {
            c.x >= patch_radius
                && c.y >= patch_radius
                && c.x + patch_radius < width
                && c.y + patch_radius < height
                && rois.iter().any(|roi| roi.contains(c.x as f32, c.y as f32))
        })
        .collect();
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keypoints = Vec::new();
    let mut descriptors = Vec::new();
    for corner in corners {
        if keypoints.len() >= max_features {
            break;
        }
        if let Some(descriptor) = describe_patch(&gray, corner.x, corner.y, patch_radius) {
            keypoints.push(Keypoint {
                x: corner.x as f32,
                y: corner.y as f32,
                response: corner.score,
            });
            descriptors.push(descriptor);
        }
    }

    ImageFeatures {
        image_index,
        image_size: (width, height),
        keypoints,
        descriptors,
    }
}

/// Zero-mean, unit-norm intensity patch. `None` for flat patches or patches on border black.
fn describe_patch(gray: &GrayImage, cx: u32, cy: u32, radius: u32) -> Option<Vec<f32>> {
    let side = 2 * radius + 1;
    let mut values = Vec::with_capacity((side * side) as usize);
    for y in cy - radius..=cy + radius {
        for x in cx - radius..=cx + radius {
            let value = gray.get_pixel(x, y)[0];
            if value <= BLACK_TOLERANCE as u8 {
                return None;
            }
            values.push(value as f32);
        }
    }

    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter_mut().for_each(|v| *v -= mean);
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < 1e-3 {
        return None;
    }
    values.iter_mut().for_each(|v| *v /= norm);
    Some(values)
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn best_two(query: &[f32], train: &[Vec<f32>]) -> Option<(usize, f32, f32)> {
    let mut best = f32::MAX;
    let mut second = f32::MAX;
    let mut best_idx = None;
    for (idx, candidate) in train.iter().enumerate() {
        let distance = squared_distance(query, candidate);
        if distance < best {
            second = best;
            best = distance;
            best_idx = Some(idx);
        } else if distance < second {
            second = distance;
        }
    }
    best_idx.map(|idx| (idx, best, second))
}

/// Ratio-tested, cross-checked nearest neighbours.
pub fn match_descriptors(src: &ImageFeatures, dst: &ImageFeatures, ratio: f32) -> Vec<FeatureMatch> {
    let ratio_sq = ratio * ratio;
    let backward: Vec<Option<usize>> = dst
        .descriptors
        .iter()
        .map(|d| best_two(d, &src.descriptors).map(|(idx, _, _)| idx))
        .collect();

    let mut matches = Vec::new();
    for (query, descriptor) in src.descriptors.iter().enumerate() {
        if let Some((train, best, second)) = best_two(descriptor, &dst.descriptors)
            && (second == f32::MAX || best < ratio_sq * second)
            && backward[train] == Some(query)
        {
            matches.push(FeatureMatch {
                query,
                train,
                distance: best.sqrt(),
            });
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn flat_and_black_patches_have_no_descriptor() {
        let flat = GrayImage::from_pixel(20, 20, image::Luma([90]));
        assert!(describe_patch(&flat, 10, 10, 4).is_none());

        let mut mixed = GrayImage::from_fn(20, 20, |x, _| image::Luma([20 + x as u8 * 10]));
        assert!(describe_patch(&mixed, 10, 10, 4).is_some());
        mixed.put_pixel(8, 8, image::Luma([0]));
        assert!(describe_patch(&mixed, 10, 10, 4).is_none());
    }

    #[test]
    fn black_image_has_no_features() {
        let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let features = detect_and_describe(&image, 0, &[PixelRect::full(64, 64)], 20, 4, 100);
        assert!(features.is_empty());
        assert_eq!(features.image_size, (64, 64));
    }
}
