//! Occlusion sensitivity: how much the class score drops when a square patch
//! of the input is blacked out.
//!
//! Patches overlap whenever `stride < patch_size`, and every patch adds its
//! impact to each pixel it covers. Pixels under many high-impact patches are
//! therefore emphasized; the heatmap is a sum, not a per-pixel maximum.

use image::RgbImage;
use ndarray::{s, Array2, Array4};

use crate::config::OcclusionConfig;
use crate::explain::render;
use crate::explain::AttributionError;
use crate::model::oracle::Oracle;

#[derive(Debug, Clone)]
pub struct OcclusionMap {
    pub overlay: RgbImage,
    /// Clamped and scaled to `[0, 1]`.
    pub heatmap: Array2<f32>,
    /// Largest `|baseline - occluded|` over all evaluated patches.
    pub max_abs_impact: f32,
    pub baseline: f32,
    pub patches_evaluated: usize,
}

pub fn occlusion_map(
    oracle: &dyn Oracle,
    normalized: &Array4<f32>,
    display: &RgbImage,
    class: usize,
    config: &OcclusionConfig,
) -> Result<OcclusionMap, AttributionError> {
    let (n, height, width, _) = normalized.dim();
    let OcclusionConfig {
        patch_size,
        stride,
        max_patches,
    } = *config;

    if n != 1 {
        return Err(AttributionError::InvalidParameters(format!(
            "expected a single-image batch, got {}",
            n
        )));
    }
    if patch_size == 0 || stride == 0 || patch_size > height || patch_size > width {
        return Err(AttributionError::InvalidParameters(format!(
            "patch {} / stride {} do not fit a {}x{} image",
            patch_size, stride, height, width
        )));
    }
    if display.dimensions() != (width as u32, height as u32) {
        return Err(AttributionError::InvalidParameters(
            "display image does not match the network input".to_string(),
        ));
    }

    let baseline = oracle.predict_class(normalized.view(), class)?[0];
    log::info!("Baseline prediction: {}", baseline);

    let mut heatmap = Array2::<f32>::zeros((height, width));
    let mut max_abs_impact = 0.0f32;
    let mut patches_evaluated = 0;
    let mut occluded = normalized.clone();

    'scan: for y in (0..=height - patch_size).step_by(stride) {
        for x in (0..=width - patch_size).step_by(stride) {
            if patches_evaluated >= max_patches {
                log::info!("Reached maximum patches: {}", max_patches);
                break 'scan;
            }

            occluded
                .slice_mut(s![0, y..y + patch_size, x..x + patch_size, ..])
                .fill(0.0);
            let score = oracle.predict_class(occluded.view(), class)?[0];
            occluded
                .slice_mut(s![0, y..y + patch_size, x..x + patch_size, ..])
                .assign(&normalized.slice(s![0, y..y + patch_size, x..x + patch_size, ..]));

            let impact = baseline - score;
            heatmap
                .slice_mut(s![y..y + patch_size, x..x + patch_size])
                .mapv_inplace(|v| v + impact);
            max_abs_impact = max_abs_impact.max(impact.abs());
            patches_evaluated += 1;
        }
    }
    log::info!("Evaluated {} patches for occlusion map", patches_evaluated);

    normalize_heatmap(&mut heatmap);
    let overlay = if heatmap.iter().all(|v| *v == 0.0) {
        display.clone()
    } else {
        render::blend(
            display,
            render::OVERLAY_IMAGE_WEIGHT,
            &render::colorize(&heatmap),
            render::OVERLAY_HEATMAP_WEIGHT,
        )
    };
    log::info!("Computed occlusion impact: {}", max_abs_impact);

    Ok(OcclusionMap {
        overlay,
        heatmap,
        max_abs_impact,
        baseline,
        patches_evaluated,
    })
}

/// Drops negative evidence and scales by the map's own maximum.
pub fn normalize_heatmap(heatmap: &mut Array2<f32>) {
    heatmap.mapv_inplace(|v| v.max(0.0));
    let max = heatmap.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        heatmap.mapv_inplace(|v| v / max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::oracle::OracleError;
    use image::Rgb;
    use ndarray::{Array2, ArrayView4, Axis};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Class 0 score is the mean brightness of the top-left quadrant.
    struct QuadrantOracle {
        calls: AtomicUsize,
    }

    impl Oracle for QuadrantOracle {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (n, h, w, _) = batch.dim();
            let mut out = Array2::zeros((n, 2));
            for i in 0..n {
                let img = batch.index_axis(Axis(0), i);
                let q = img.slice(s![..h / 2, ..w / 2, ..]);
                let score = q.mean().unwrap_or(0.0);
                out[[i, 0]] = score;
                out[[i, 1]] = 1.0 - score;
            }
            Ok(out)
        }

        fn num_classes(&self) -> usize {
            2
        }
    }

    /// Top-left quadrant counts for the class, bottom-right against it.
    struct OpposedQuadrantsOracle;

    impl Oracle for OpposedQuadrantsOracle {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
            let (n, h, w, _) = batch.dim();
            let mut out = Array2::zeros((n, 1));
            for i in 0..n {
                let img = batch.index_axis(Axis(0), i);
                let top_left = img.slice(s![..h / 2, ..w / 2, ..]).mean().unwrap_or(0.0);
                let bottom_right = img.slice(s![h / 2.., w / 2.., ..]).mean().unwrap_or(0.0);
                out[[i, 0]] = 0.5 + top_left - bottom_right;
            }
            Ok(out)
        }

        fn num_classes(&self) -> usize {
            1
        }
    }

    fn quadrant() -> QuadrantOracle {
        QuadrantOracle {
            calls: AtomicUsize::new(0),
        }
    }

    fn config(patch: usize, stride: usize, max: usize) -> OcclusionConfig {
        OcclusionConfig {
            patch_size: patch,
            stride,
            max_patches: max,
        }
    }

    #[test]
    fn heatmap_is_unit_range_and_peaks_on_sensitive_quadrant() {
        let oracle = quadrant();
        let normalized = Array4::from_elem((1, 16, 16, 3), 1.0);
        let display = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
        let map = occlusion_map(&oracle, &normalized, &display, 0, &config(4, 4, 100))
            .expect("map");

        assert_eq!(map.patches_evaluated, 16);
        assert!(map.heatmap.iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(map.heatmap[[0, 0]], 1.0);
        assert_eq!(map.heatmap[[15, 15]], 0.0);
        // A 4x4 patch zeroes a quarter of the 8x8 quadrant.
        assert!((map.max_abs_impact - 0.25).abs() < 1e-6);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 17);
    }

    #[test]
    fn scan_stops_at_patch_cap() {
        let oracle = quadrant();
        let normalized = Array4::from_elem((1, 16, 16, 3), 1.0);
        let display = RgbImage::new(16, 16);
        let map = occlusion_map(&oracle, &normalized, &display, 0, &config(4, 2, 5)).expect("map");
        assert_eq!(map.patches_evaluated, 5);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn only_negative_impacts_leave_display_untouched() {
        // Class 1 rises when the quadrant darkens, so every impact is <= 0.
        let oracle = quadrant();
        let normalized = Array4::from_elem((1, 8, 8, 3), 1.0);
        let display = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 90]));
        let map = occlusion_map(&oracle, &normalized, &display, 1, &config(4, 4, 100))
            .expect("map");
        assert!(map.heatmap.iter().all(|v| *v == 0.0));
        assert_eq!(map.overlay, display);
        // The first patch covers the whole 4x4 quadrant: class 1 goes 0 -> 1.
        assert!((map.max_abs_impact - 1.0).abs() < 1e-6);
    }

    #[test]
    fn reported_impact_is_the_largest_absolute_patch_impact() {
        let oracle = OpposedQuadrantsOracle;
        let normalized = Array4::from_shape_fn((1, 32, 32, 3), |(_, y, x, c)| {
            ((y * 7 + x * 3 + c) % 11) as f32 / 10.0
        });
        let display = RgbImage::new(32, 32);
        let cfg = config(8, 4, 100);
        let map = occlusion_map(&oracle, &normalized, &display, 0, &cfg).expect("map");

        let baseline = oracle.predict_class(normalized.view(), 0).expect("baseline")[0];
        let mut expected = 0.0f32;
        let mut saw_positive = false;
        let mut saw_negative = false;
        for y in (0..=32 - 8).step_by(4) {
            for x in (0..=32 - 8).step_by(4) {
                let mut occluded = normalized.clone();
                occluded.slice_mut(s![0, y..y + 8, x..x + 8, ..]).fill(0.0);
                let score = oracle.predict_class(occluded.view(), 0).expect("score")[0];
                let impact = baseline - score;
                saw_positive |= impact > 0.0;
                saw_negative |= impact < 0.0;
                expected = expected.max(impact.abs());
            }
        }

        assert!(saw_positive && saw_negative);
        assert_eq!(map.patches_evaluated, 49);
        assert!((map.baseline - baseline).abs() < 1e-6);
        assert!((map.max_abs_impact - expected).abs() < 1e-6);
    }

    #[test]
    fn rerunning_gives_identical_results() {
        let oracle = OpposedQuadrantsOracle;
        let normalized = Array4::from_shape_fn((1, 32, 32, 3), |(_, y, x, _)| {
            if (x + y) % 3 == 0 { 1.0 } else { 0.4 }
        });
        let display = RgbImage::from_fn(32, 32, |x, y| Rgb([x as u8 * 8, y as u8 * 8, 40]));
        let cfg = config(8, 4, 100);

        let first = occlusion_map(&oracle, &normalized, &display, 0, &cfg).expect("first");
        let second = occlusion_map(&oracle, &normalized, &display, 0, &cfg).expect("second");

        assert!(first.max_abs_impact > 0.0);
        assert_eq!(first.max_abs_impact, second.max_abs_impact);
        assert_eq!(first.heatmap, second.heatmap);
        assert_eq!(first.overlay, second.overlay);
        assert_ne!(first.overlay, display);
    }

    #[test]
    fn rejects_patch_larger_than_image() {
        let oracle = quadrant();
        let normalized = Array4::zeros((1, 8, 8, 3));
        let display = RgbImage::new(8, 8);
        let err = occlusion_map(&oracle, &normalized, &display, 0, &config(16, 4, 10)).unwrap_err();
        assert!(matches!(err, AttributionError::InvalidParameters(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn normalize_clamps_then_scales() {
        let mut h = ndarray::array![[-2.0, 1.0], [4.0, 0.0]];
        normalize_heatmap(&mut h);
        assert_eq!(h, ndarray::array![[0.0, 0.25], [1.0, 0.0]]);
    }
}
