//! Segmentation-based local surrogate.
//!
//! Segments are switched off at random, the perturbed images are scored,
//! and a weighted ridge regression over the on/off indicators estimates how
//! much each segment moves the class score.

use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use shared::Feature;

use crate::config::SegmentationConfig;
use crate::explain::render;
use crate::explain::segmentation::{slic, Segments};
use crate::explain::AttributionError;
use crate::model::oracle::Oracle;
use crate::model::preprocess::rgb_to_array;

#[derive(Debug, Clone)]
pub struct SurrogateFit {
    pub intercept: f32,
    pub weights: Vec<f32>,
    /// Weighted R² of the surrogate on its own samples.
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct SegmentExplanation {
    pub overlay: RgbImage,
    pub segments: Segments,
    pub fit: SurrogateFit,
    /// `(segment, weight)` sorted by descending `|weight|`, truncated to
    /// `num_features`.
    pub ranked: Vec<(usize, f32)>,
}

impl SegmentExplanation {
    pub fn features(&self, class_label: &str) -> Vec<Feature> {
        self.ranked
            .iter()
            .map(|&(segment, weight)| Feature {
                name: format!("Region {}", segment),
                description: format!("Image region {} contributing to {}", segment, class_label),
                impact: weight,
            })
            .collect()
    }
}

/// `oracle` receives display-space batches, see `Normalized`.
pub fn explain_segmented(
    oracle: &dyn Oracle,
    display: &RgbImage,
    class: usize,
    config: &SegmentationConfig,
) -> Result<SegmentExplanation, AttributionError> {
    if config.num_samples == 0 || config.batch_size == 0 {
        return Err(AttributionError::InvalidParameters(
            "num_samples and batch_size must be positive".to_string(),
        ));
    }

    let segments = slic(display, config.n_segments, config.compactness, config.max_iterations);
    if segments.count == 0 {
        return Err(AttributionError::Computation("segmentation produced no segments".to_string()));
    }
    log::info!("Segmented image into {} regions", segments.count);

    let base = rgb_to_array(display);
    let fill = fill_image(&base, &segments, config.hide_color);
    let design = sample_design(segments.count, config.num_samples, config.seed);

    let mut targets = Vec::with_capacity(design.nrows());
    for chunk in design.axis_chunks_iter(Axis(0), config.batch_size) {
        let batch = perturb_batch(&base, &fill, &segments, chunk.view());
        let scores = oracle.predict_class(batch.view(), class)?;
        targets.extend(scores);
    }
    let targets = Array1::from(targets);

    let sample_weights = kernel_weights(&design, config.kernel_width);
    let fit = weighted_ridge(&design, &targets, &sample_weights, config.ridge_alpha)?;
    log::info!("Surrogate intercept {:.4}, score {:.4}", fit.intercept, fit.score);

    let mut ranked: Vec<(usize, f32)> = fit.weights.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then(a.0.cmp(&b.0)));
    ranked.truncate(config.num_features);
    for (segment, weight) in &ranked {
        log::debug!("Region {} raw weight: {}", segment, weight);
    }

    let positive: Vec<usize> = ranked.iter().filter(|(_, w)| *w > 0.0).map(|(s, _)| *s).collect();
    let overlay = render::mark_boundaries(display, &segments.mask_of(&positive));

    Ok(SegmentExplanation {
        overlay,
        segments,
        fit,
        ranked,
    })
}

/// Replacement pixels for hidden segments: a constant, or each segment's own
/// mean colour.
fn fill_image(base: &Array3<f32>, segments: &Segments, hide_color: Option<f32>) -> Array3<f32> {
    match hide_color {
        Some(value) => Array3::from_elem(base.dim(), value),
        None => {
            let mut sums = vec![[0.0f64; 3]; segments.count];
            let sizes = segments.sizes();
            for ((y, x), &l) in segments.labels.indexed_iter() {
                for c in 0..3 {
                    sums[l][c] += base[[y, x, c]] as f64;
                }
            }
            Array3::from_shape_fn(base.dim(), |(y, x, c)| {
                let l = segments.labels[[y, x]];
                (sums[l][c] / sizes[l].max(1) as f64) as f32
            })
        }
    }
}

/// Row 0 keeps every segment; the rest flip each segment on with p = 0.5.
pub fn sample_design(num_segments: usize, num_samples: usize, seed: u64) -> Array2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut design = Array2::<f32>::ones((num_samples, num_segments));
    for mut row in design.rows_mut().into_iter().skip(1) {
        for v in row.iter_mut() {
            *v = if rng.random_bool(0.5) { 1.0 } else { 0.0 };
        }
    }
    design
}

fn perturb_batch(
    base: &Array3<f32>,
    fill: &Array3<f32>,
    segments: &Segments,
    rows: ndarray::ArrayView2<'_, f32>,
) -> Array4<f32> {
    let (h, w, _) = base.dim();
    Array4::from_shape_fn((rows.nrows(), h, w, 3), |(i, y, x, c)| {
        if rows[[i, segments.labels[[y, x]]]] > 0.5 {
            base[[y, x, c]]
        } else {
            fill[[y, x, c]]
        }
    })
}

/// `sqrt(exp(-d² / width²))` with `d` the cosine distance to the all-on row.
pub fn kernel_weights(design: &Array2<f32>, kernel_width: f32) -> Array1<f32> {
    let n_features = design.ncols() as f32;
    design.map_axis(Axis(1), |row| {
        let on = row.sum();
        let distance = if on <= 0.0 {
            1.0
        } else {
            1.0 - on / (on.sqrt() * n_features.sqrt())
        };
        (-(distance * distance) / (kernel_width * kernel_width)).exp().sqrt()
    })
}

/// Ridge regression with an unpenalized intercept and per-sample weights.
pub fn weighted_ridge(
    x: &Array2<f32>,
    y: &Array1<f32>,
    sample_weights: &Array1<f32>,
    alpha: f32,
) -> Result<SurrogateFit, AttributionError> {
    let (n, p) = x.dim();
    let x = x.mapv(f64::from);
    let y = y.mapv(f64::from);
    let sw = sample_weights.mapv(f64::from);
    let total = sw.sum();
    if n == 0 || total <= 0.0 {
        return Err(AttributionError::Computation("no weighted samples to fit".to_string()));
    }

    let x_mean = x.t().dot(&sw) / total;
    let y_mean = y.dot(&sw) / total;
    let xc = &x - &x_mean.view().insert_axis(Axis(0));
    let yc = &y - y_mean;

    let xw = &xc * &sw.view().insert_axis(Axis(1));
    let mut gram = xw.t().dot(&xc);
    for i in 0..p {
        gram[[i, i]] += alpha as f64;
    }
    let rhs = xw.t().dot(&yc);
    let coef = solve_spd(gram, rhs)?;
    let intercept = y_mean - x_mean.dot(&coef);

    let pred = x.dot(&coef) + intercept;
    let ss_res: f64 = sw
        .iter()
        .zip(y.iter().zip(pred.iter()))
        .map(|(w, (t, p))| w * (t - p).powi(2))
        .sum();
    let ss_tot: f64 = sw
        .iter()
        .zip(y.iter())
        .map(|(w, t)| w * (t - y_mean).powi(2))
        .sum();
    let score = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 1.0 };

    Ok(SurrogateFit {
        intercept: intercept as f32,
        weights: coef.iter().map(|c| *c as f32).collect(),
        score: score as f32,
    })
}

/// Gaussian elimination with partial pivoting; `a` is symmetric positive
/// definite whenever the ridge penalty is positive.
fn solve_spd(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, AttributionError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-12 {
            return Err(AttributionError::Computation("singular surrogate system".to_string()));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}
