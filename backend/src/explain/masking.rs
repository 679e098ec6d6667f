//! Masked-sampling additive attribution over a hierarchical image partition.
//!
//! The image is split recursively into halves. Each split shares its
//! parent's value between the two halves using their stand-alone effects
//! (a two-player Shapley split) and divides the interaction residual
//! evenly, so the leaf values always add up to
//! `f(full image) - f(fully masked image)`. Masked pixels are inpainted
//! from the visible ones rather than blanked.

use image::RgbImage;
use ndarray::{s, Array2, Array3, Array4, Axis};
use shared::Feature;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use crate::config::MaskingConfig;
use crate::explain::render;
use crate::explain::AttributionError;
use crate::model::oracle::Oracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub y: usize,
    pub x: usize,
    pub h: usize,
    pub w: usize,
}

impl Rect {
    pub fn area(&self) -> usize {
        self.h * self.w
    }

    /// Halves the longer side, unless that would go below `min` pixels.
    fn split(&self, min: usize) -> Option<(Rect, Rect)> {
        if self.h >= self.w && self.h >= 2 * min {
            let top = self.h / 2;
            Some((
                Rect { h: top, ..*self },
                Rect {
                    y: self.y + top,
                    h: self.h - top,
                    ..*self
                },
            ))
        } else if self.w >= 2 * min {
            let left = self.w / 2;
            Some((
                Rect { w: left, ..*self },
                Rect {
                    x: self.x + left,
                    w: self.w - left,
                    ..*self
                },
            ))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Node {
    rect: Rect,
    /// Attribution assigned to this region.
    value: f64,
    /// `f(only this region visible) - f(nothing visible)`.
    solo: f64,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .abs()
            .total_cmp(&other.value.abs())
            .then_with(|| other.rect.y.cmp(&self.rect.y))
            .then_with(|| other.rect.x.cmp(&self.rect.x))
    }
}

#[derive(Debug, Clone)]
pub struct MaskedExplanation {
    pub overlay: RgbImage,
    /// Per-pixel attribution density; sums to `full - masked`.
    pub values: Array2<f32>,
    /// Leaf regions with their attribution, largest `|value|` first.
    pub leaves: Vec<(Rect, f32)>,
    pub full: f32,
    pub masked: f32,
    pub evaluations: usize,
}

impl MaskedExplanation {
    pub fn features(&self, limit: usize) -> Vec<Feature> {
        self.leaves
            .iter()
            .take(limit)
            .map(|(r, v)| Feature {
                name: format!("Cell ({},{} {}x{})", r.x, r.y, r.w, r.h),
                description: "Image cell attributed by masked sampling".to_string(),
                impact: *v,
            })
            .collect()
    }
}

pub fn explain_masked(
    oracle: &dyn Oracle,
    normalized: &Array4<f32>,
    display: &RgbImage,
    class: usize,
    config: &MaskingConfig,
) -> Result<MaskedExplanation, AttributionError> {
    let (n, h, w, _) = normalized.dim();
    if n != 1 || h == 0 || w == 0 {
        return Err(AttributionError::InvalidParameters(format!(
            "expected one non-empty image, got {:?}",
            normalized.shape()
        )));
    }
    if config.max_evals < 2 || config.batch_size == 0 || config.min_region == 0 {
        return Err(AttributionError::InvalidParameters(
            "max_evals >= 2, batch_size > 0 and min_region > 0 are required".to_string(),
        ));
    }

    let image = normalized.index_axis(Axis(0), 0).to_owned();
    let whole = Rect { y: 0, x: 0, h, w };

    let fully_masked = inpaint(&image, &visible_mask(h, w, None));
    let endpoints = score(oracle, &[image.clone(), fully_masked], class, config.batch_size)?;
    let (full, masked) = (endpoints[0], endpoints[1]);
    let mut evaluations = 2;
    log::info!("Masked sampling: full {:.4}, fully masked {:.4}", full, masked);

    let total = (full - masked) as f64;
    let mut frontier = BinaryHeap::new();
    frontier.push(Node {
        rect: whole,
        value: total,
        solo: total,
    });
    let mut leaves = Vec::new();
    let per_round = (config.batch_size / 2).max(1);

    while evaluations + 2 <= config.max_evals {
        let budget = ((config.max_evals - evaluations) / 2).min(per_round);
        let mut round = Vec::with_capacity(budget);
        while round.len() < budget {
            let Some(node) = frontier.pop() else { break };
            match node.rect.split(config.min_region) {
                Some((a, b)) => round.push((node, a, b)),
                None => leaves.push(node),
            }
        }
        if round.is_empty() {
            break;
        }

        let variants: Vec<Array3<f32>> = round
            .iter()
            .flat_map(|(_, a, b)| [*a, *b])
            .map(|r| inpaint(&image, &visible_mask(h, w, Some(r))))
            .collect();
        let scores = score(oracle, &variants, class, config.batch_size)?;
        evaluations += variants.len();

        for (i, (node, a, b)) in round.into_iter().enumerate() {
            let fa = (scores[2 * i] - masked) as f64;
            let fb = (scores[2 * i + 1] - masked) as f64;
            let share_a = 0.5 * (fa + (node.solo - fb));
            let share_b = 0.5 * (fb + (node.solo - fa));
            let residual = 0.5 * (node.value - node.solo);
            frontier.push(Node {
                rect: a,
                value: share_a + residual,
                solo: fa,
            });
            frontier.push(Node {
                rect: b,
                value: share_b + residual,
                solo: fb,
            });
        }
    }
    leaves.extend(frontier.into_vec());
    leaves.sort_by(|a, b| b.cmp(a));
    log::info!("Masked sampling used {} evaluations over {} regions", evaluations, leaves.len());

    let mut values = Array2::<f32>::zeros((h, w));
    for leaf in &leaves {
        let r = leaf.rect;
        let density = (leaf.value / r.area() as f64) as f32;
        values.slice_mut(s![r.y..r.y + r.h, r.x..r.x + r.w]).fill(density);
    }

    Ok(MaskedExplanation {
        overlay: render::diverging_overlay(display, &values),
        values,
        leaves: leaves.iter().map(|n| (n.rect, n.value as f32)).collect(),
        full,
        masked,
        evaluations,
    })
}

fn score(
    oracle: &dyn Oracle,
    images: &[Array3<f32>],
    class: usize,
    batch_size: usize,
) -> Result<Vec<f32>, AttributionError> {
    let mut out = Vec::with_capacity(images.len());
    for chunk in images.chunks(batch_size) {
        let views: Vec<_> = chunk.iter().map(|img| img.view()).collect();
        let batch = ndarray::stack(Axis(0), &views)
            .map_err(|e| AttributionError::Computation(e.to_string()))?;
        out.extend(oracle.predict_class(batch.view(), class)?);
    }
    Ok(out)
}

/// `true` marks pixels to be inpainted: everything outside `visible`.
fn visible_mask(h: usize, w: usize, visible: Option<Rect>) -> Array2<bool> {
    let mut mask = Array2::from_elem((h, w), true);
    if let Some(r) = visible {
        mask.slice_mut(s![r.y..r.y + r.h, r.x..r.x + r.w]).fill(false);
    }
    mask
}

/// Fills masked pixels layer by layer from the outside in, each pixel taking
/// the mean of its already-known 8-neighbours. With nothing known, masked
/// pixels become zero.
pub fn inpaint(image: &Array3<f32>, masked: &Array2<bool>) -> Array3<f32> {
    let (h, w, channels) = image.dim();
    let mut out = image.clone();
    let mut known = masked.mapv(|m| !m);

    if !known.iter().any(|k| *k) {
        out.fill(0.0);
        return out;
    }

    let neighbours = move |y: usize, x: usize| {
        (-1isize..=1)
            .flat_map(move |dy| (-1isize..=1).map(move |dx| (dy, dx)))
            .filter(|&(dy, dx)| dy != 0 || dx != 0)
            .filter_map(move |(dy, dx)| {
                let ny = y as isize + dy;
                let nx = x as isize + dx;
                let inside = ny >= 0 && nx >= 0 && (ny as usize) < h && (nx as usize) < w;
                inside.then_some((ny as usize, nx as usize))
            })
    };

    let mut queued = known.clone();
    let mut layer = VecDeque::new();
    for ((y, x), &m) in masked.indexed_iter() {
        if m && neighbours(y, x).any(|(ny, nx)| known[[ny, nx]]) {
            queued[[y, x]] = true;
            layer.push_back((y, x));
        }
    }

    while !layer.is_empty() {
        let mut filled = Vec::with_capacity(layer.len());
        for &(y, x) in &layer {
            let mut acc = vec![0.0f32; channels];
            let mut count = 0;
            for (ny, nx) in neighbours(y, x).filter(|&(ny, nx)| known[[ny, nx]]) {
                for (c, a) in acc.iter_mut().enumerate() {
                    *a += out[[ny, nx, c]];
                }
                count += 1;
            }
            filled.push((y, x, acc, count.max(1) as f32));
        }

        let mut next = VecDeque::new();
        for (y, x, acc, count) in filled {
            for (c, a) in acc.into_iter().enumerate() {
                out[[y, x, c]] = a / count;
            }
            known[[y, x]] = true;
            for (ny, nx) in neighbours(y, x) {
                if !queued[[ny, nx]] {
                    queued[[ny, nx]] = true;
                    next.push_back((ny, nx));
                }
            }
        }
        layer = next;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::oracle::OracleError;
    use image::Rgb;
    use ndarray::{Array2, ArrayView4};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    /// Class 0 scores the mean of the left half, squared, so halves interact.
    struct LeftHalfOracle {
        calls: AtomicUsize,
        images: AtomicUsize,
    }

    impl Oracle for LeftHalfOracle {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            let (n, _, w, _) = batch.dim();
            self.images.fetch_add(n, AtomicOrdering::SeqCst);
            let mut out = Array2::zeros((n, 1));
            for i in 0..n {
                let left = batch.slice(s![i, .., ..w / 2, ..]);
                out[[i, 0]] = left.mean().unwrap_or(0.0).powi(2);
            }
            Ok(out)
        }

        fn num_classes(&self) -> usize {
            1
        }
    }

    fn config(max_evals: usize, batch_size: usize) -> MaskingConfig {
        MaskingConfig {
            max_evals,
            batch_size,
            min_region: 2,
            emit_regions: true,
            num_features: 3,
        }
    }

    #[test]
    fn attributions_add_up_to_full_minus_masked() {
        let oracle = LeftHalfOracle {
            calls: AtomicUsize::new(0),
            images: AtomicUsize::new(0),
        };
        let normalized = Array4::from_elem((1, 16, 16, 3), 1.0);
        let display = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let result = explain_masked(&oracle, &normalized, &display, 0, &config(20, 5))
            .expect("explain");

        let sum: f32 = result.values.sum();
        assert!((sum - (result.full - result.masked)).abs() < 1e-4);
        let leaf_sum: f32 = result.leaves.iter().map(|(_, v)| v).sum();
        assert!((leaf_sum - sum).abs() < 1e-4);
        assert!(result.evaluations <= 20);
        assert_eq!(oracle.images.load(AtomicOrdering::SeqCst), result.evaluations);
    }

    #[test]
    fn right_half_gets_no_credit() {
        let oracle = LeftHalfOracle {
            calls: AtomicUsize::new(0),
            images: AtomicUsize::new(0),
        };
        let normalized =
            Array4::from_shape_fn((1, 8, 16, 3), |(_, _, x, _)| if x < 8 { 1.0 } else { 0.0 });
        let display = RgbImage::new(16, 8);
        let result = explain_masked(&oracle, &normalized, &display, 0, &config(4, 2))
            .expect("explain");
        // One split: left | right.
        assert_eq!(result.evaluations, 4);
        assert!((result.values[[0, 0]] - 1.0 / 64.0).abs() < 1e-6);
        assert_eq!(result.values[[0, 15]], 0.0);
        assert_eq!(result.features(3).len(), 2);
    }

    #[test]
    fn batches_respect_batch_size() {
        let oracle = LeftHalfOracle {
            calls: AtomicUsize::new(0),
            images: AtomicUsize::new(0),
        };
        let normalized = Array4::from_elem((1, 16, 16, 3), 0.5);
        let display = RgbImage::new(16, 16);
        let result = explain_masked(&oracle, &normalized, &display, 0, &config(10, 1))
            .expect("explain");
        assert_eq!(oracle.calls.load(AtomicOrdering::SeqCst), result.evaluations);
    }

    #[test]
    fn inpaint_fills_from_known_pixels() {
        let mut image = Array3::<f32>::zeros((3, 3, 1));
        image.fill(4.0);
        let mut mask = Array2::from_elem((3, 3), false);
        mask[[1, 1]] = true;
        image[[1, 1, 0]] = -100.0;
        let out = inpaint(&image, &mask);
        assert_eq!(out[[1, 1, 0]], 4.0);

        let all = Array2::from_elem((3, 3), true);
        assert!(inpaint(&image, &all).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn split_halves_the_longer_side() {
        let r = Rect { y: 0, x: 0, h: 8, w: 16 };
        let (a, b) = r.split(2).expect("splittable");
        assert_eq!(a, Rect { y: 0, x: 0, h: 8, w: 8 });
        assert_eq!(b, Rect { y: 0, x: 8, h: 8, w: 8 });
        assert!(Rect { y: 0, x: 0, h: 3, w: 3 }.split(2).is_none());
    }
}
