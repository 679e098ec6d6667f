use ndarray::{Array2, Array4, ArrayView4};

use crate::config::NormalizationConfig;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected shape: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// A classifier seen only through its predictions.
///
/// Batches are `[N, H, W, 3]`; the result is `[N, num_classes]`. Identical
/// input must give identical output. Implementations are free to serialize
/// calls internally.
pub trait Oracle: Send + Sync {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError>;

    fn num_classes(&self) -> usize;

    /// Score of one class for every image in the batch.
    fn predict_class(
        &self,
        batch: ArrayView4<'_, f32>,
        class: usize,
    ) -> Result<Vec<f32>, OracleError> {
        let n = batch.shape()[0];
        let probs = self.predict(batch)?;
        if probs.nrows() != n || class >= probs.ncols() {
            return Err(OracleError::ShapeMismatch {
                expected: format!("[{}, >{}]", n, class),
                got: format!("{:?}", probs.shape()),
            });
        }
        Ok(probs.column(class).to_vec())
    }
}

impl<O: Oracle + ?Sized> Oracle for std::sync::Arc<O> {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        (**self).predict(batch)
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }
}

impl<O: Oracle + ?Sized> Oracle for &O {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        (**self).predict(batch)
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }
}

pub fn normalize_in_place(batch: &mut Array4<f32>, norm: &NormalizationConfig) {
    for mut pixel in batch.lanes_mut(ndarray::Axis(3)) {
        for (c, value) in pixel.iter_mut().enumerate() {
            *value = (*value * norm.scale - norm.mean[c]) / norm.std[c];
        }
    }
}

/// Accepts display-space batches (raw 0..255 RGB) and normalizes them before
/// handing them to the wrapped oracle.
pub struct Normalized<O> {
    inner: O,
    norm: NormalizationConfig,
}

impl<O: Oracle> Normalized<O> {
    pub fn new(inner: O, norm: NormalizationConfig) -> Self {
        Self { inner, norm }
    }
}

impl<O: Oracle> Oracle for Normalized<O> {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        let mut owned = batch.to_owned();
        normalize_in_place(&mut owned, &self.norm);
        self.inner.predict(owned.view())
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }
}

/// Index of the highest score, or `None` for an empty row.
pub fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &value) in row.iter().enumerate() {
        match best {
            Some((_, top)) if value.total_cmp(&top).is_le() => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    struct MeanOracle;

    impl Oracle for MeanOracle {
        fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
            let n = batch.shape()[0];
            let mut out = Array2::zeros((n, 2));
            for i in 0..n {
                let mean = batch.index_axis(ndarray::Axis(0), i).mean().unwrap_or(0.0);
                out[[i, 0]] = mean;
                out[[i, 1]] = 1.0 - mean;
            }
            Ok(out)
        }

        fn num_classes(&self) -> usize {
            2
        }
    }

    #[test]
    fn normalized_oracle_applies_scale_mean_std() {
        let norm = NormalizationConfig {
            scale: 1.0 / 255.0,
            mean: [0.5; 3],
            std: [0.5; 3],
        };
        let oracle = Normalized::new(MeanOracle, norm);
        let batch = Array4::from_elem((1, 2, 2, 3), 255.0);
        let scores = oracle.predict_class(batch.view(), 0).expect("prediction");
        assert!((scores[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn predict_class_rejects_out_of_range_class() {
        let batch = Array4::zeros((1, 2, 2, 3));
        assert!(matches!(
            MeanOracle.predict_class(batch.view(), 5),
            Err(OracleError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }
}
