use ndarray::{Array2, Array4};
use serde::Serialize;
use shared::{PredictionInfo, PredictionResponse};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::context::AppContext;
use crate::model::oracle::{argmax, OracleError};
use crate::model::preprocess::{prepare, PreprocessError};
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("Image processing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Prediction failed: {0}")]
    Oracle(#[from] OracleError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    pub status: String,
    pub predicted_class: String,
    pub confidence: f32,
    pub all_probabilities: BTreeMap<String, f32>,
}

pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Stages the upload under a fresh request id, then classifies it.
///
/// Staging comes first so the returned id can be explained later.
pub fn predict(
    ctx: &AppContext,
    bytes: &[u8],
    filename: Option<String>,
) -> Result<PredictionResponse, PredictError> {
    let request_id = new_request_id();
    log::info!(
        "Processing prediction request {} for file {:?} ({} bytes)",
        request_id,
        filename,
        bytes.len()
    );
    ctx.store.stage(&request_id, bytes)?;

    let image = prepare(bytes, ctx.config.model.input_size, &ctx.config.preprocessing)?;
    let probabilities = ctx.oracle.predict(image.normalized.view())?;
    let row = single_row(&probabilities)?;
    let (condition, confidence, all_probabilities) = summarize(ctx, &row)?;
    log::info!("All probabilities: {:?}", all_probabilities);
    log::info!("Prediction {}: {} with confidence {:.4}", request_id, condition, confidence);

    Ok(PredictionResponse {
        condition,
        confidence,
        additional_info: PredictionInfo {
            request_id,
            filename,
            all_probabilities,
        },
    })
}

/// Predicts an all-zero input to show the model is callable.
pub fn self_test(ctx: &AppContext) -> Result<SelfTestReport, PredictError> {
    let size = ctx.config.model.input_size as usize;
    let zeros = Array4::<f32>::zeros((1, size, size, 3));
    let probabilities = ctx.oracle.predict(zeros.view())?;
    let row = single_row(&probabilities)?;
    let (predicted_class, confidence, all_probabilities) = summarize(ctx, &row)?;
    Ok(SelfTestReport {
        status: "ok".to_string(),
        predicted_class,
        confidence,
        all_probabilities,
    })
}

/// The scores for a single-image batch.
fn single_row(probabilities: &Array2<f32>) -> Result<Vec<f32>, OracleError> {
    if probabilities.nrows() != 1 {
        return Err(OracleError::ShapeMismatch {
            expected: "1 row".to_string(),
            got: format!("{:?}", probabilities.shape()),
        });
    }
    Ok(probabilities.row(0).to_vec())
}

fn summarize(
    ctx: &AppContext,
    row: &[f32],
) -> Result<(String, f32, BTreeMap<String, f32>), PredictError> {
    let labels = ctx.labels.as_slice();
    if row.len() != labels.len() {
        return Err(OracleError::ShapeMismatch {
            expected: format!("{} classes", labels.len()),
            got: format!("{} classes", row.len()),
        }
        .into());
    }
    let best = argmax(row)
        .and_then(|idx| ctx.labels.index(idx))
        .ok_or_else(|| OracleError::Inference("empty prediction".to_string()))?;
    let all = labels.iter().cloned().zip(row.iter().copied()).collect();
    Ok((ctx.labels.label(best).to_string(), row[best.get()], all))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_short_hex() {
        let id = new_request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_request_id());
    }

    #[test]
    fn single_row_rejects_empty_and_multi_row_output() {
        let empty = Array2::<f32>::zeros((0, 3));
        let err = single_row(&empty).unwrap_err();
        assert!(matches!(err, OracleError::ShapeMismatch { got, .. } if got == "[0, 3]"));
        assert!(single_row(&Array2::zeros((2, 3))).is_err());
        let one = ndarray::array![[0.1, 0.7, 0.2]];
        assert_eq!(single_row(&one).expect("row"), vec![0.1, 0.7, 0.2]);
    }
}
