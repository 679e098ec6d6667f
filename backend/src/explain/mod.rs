pub mod lime;
pub mod masking;
pub mod occlusion;
pub mod orchestrator;
pub mod render;
pub mod segmentation;

use image::RgbImage;
use shared::{Feature, MethodKind};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::{
    AppConfig, MaskingConfig, NormalizationConfig, OcclusionConfig, SegmentationConfig,
};
use crate::model::labels::ClassIndex;
use crate::model::oracle::{Normalized, Oracle, OracleError};
use crate::model::preprocess::PreparedImage;

pub use orchestrator::{ExplanationBundle, Explainer};

const OCCLUSION_DESCRIPTION: &str =
    "Areas where covering the region most decreases prediction confidence";

#[derive(Debug, thiserror::Error)]
pub enum AttributionError {
    #[error("Oracle failure: {0}")]
    Oracle(#[from] OracleError),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Attribution failed: {0}")]
    Computation(String),
    #[error("Attribution panicked: {0}")]
    Panicked(String),
}

/// Output of one method: an overlay aligned with the input and its ranked,
/// method-scaled features. Scores are not comparable across methods.
#[derive(Debug, Clone)]
pub struct AttributionResult {
    pub overlay: RgbImage,
    pub features: Vec<Feature>,
}

/// The closed set of attribution procedures, each carrying its settings.
#[derive(Debug, Clone)]
pub enum AttributionMethod {
    Occlusion(OcclusionConfig),
    Lime {
        config: SegmentationConfig,
        normalization: NormalizationConfig,
    },
    Shap(MaskingConfig),
}

impl AttributionMethod {
    /// All three methods in the order their features are merged.
    pub fn all(config: &AppConfig) -> [AttributionMethod; 3] {
        [
            AttributionMethod::Lime {
                config: config.segmentation,
                normalization: config.preprocessing,
            },
            AttributionMethod::Occlusion(config.occlusion),
            AttributionMethod::Shap(config.masking),
        ]
    }

    pub fn kind(&self) -> MethodKind {
        match self {
            AttributionMethod::Occlusion(_) => MethodKind::Occlusion,
            AttributionMethod::Lime { .. } => MethodKind::Lime,
            AttributionMethod::Shap(_) => MethodKind::Shap,
        }
    }

    pub fn run(
        &self,
        oracle: &dyn Oracle,
        image: &PreparedImage,
        class: ClassIndex,
        class_label: &str,
    ) -> Result<AttributionResult, AttributionError> {
        match self {
            AttributionMethod::Occlusion(config) => {
                let map = occlusion::occlusion_map(
                    oracle,
                    &image.normalized,
                    &image.display,
                    class.get(),
                    config,
                )?;
                Ok(AttributionResult {
                    overlay: map.overlay,
                    features: vec![Feature {
                        name: "Occlusion Analysis".to_string(),
                        description: OCCLUSION_DESCRIPTION.to_string(),
                        impact: map.max_abs_impact,
                    }],
                })
            }
            AttributionMethod::Lime { config, normalization } => {
                let display_oracle = Normalized::new(oracle, *normalization);
                let explanation =
                    lime::explain_segmented(&display_oracle, &image.display, class.get(), config)?;
                Ok(AttributionResult {
                    features: explanation.features(class_label),
                    overlay: explanation.overlay,
                })
            }
            AttributionMethod::Shap(config) => {
                let explanation = masking::explain_masked(
                    oracle,
                    &image.normalized,
                    &image.display,
                    class.get(),
                    config,
                )?;
                let features = if config.emit_regions {
                    explanation.features(config.num_features)
                } else {
                    Vec::new()
                };
                Ok(AttributionResult {
                    overlay: explanation.overlay,
                    features,
                })
            }
        }
    }

    /// `run`, with panics converted into `AttributionError::Panicked`.
    pub fn run_isolated(
        &self,
        oracle: &dyn Oracle,
        image: &PreparedImage,
        class: ClassIndex,
        class_label: &str,
    ) -> Result<AttributionResult, AttributionError> {
        catch_unwind(AssertUnwindSafe(|| self.run(oracle, image, class, class_label)))
            .unwrap_or_else(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(AttributionError::Panicked(msg))
            })
    }
}
