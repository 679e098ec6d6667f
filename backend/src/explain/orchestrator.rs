use shared::{ExplainImageResponse, Feature, MethodKind, MethodReport};

use crate::context::AppContext;
use crate::explain::{render, AttributionError, AttributionMethod, AttributionResult};
use crate::model::labels::ClassIndex;
use crate::model::preprocess::{prepare, PreparedImage, PreprocessError};
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("Image not found for the given request_id: {0}")]
    NotFound(String),
    #[error("Unknown class label: {0}")]
    InvalidClass(String),
    #[error("Image processing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ExplainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) | StoreError::InvalidId(id) => ExplainError::NotFound(id),
            other => ExplainError::Store(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub lime: String,
    pub occlusion: String,
    pub shap: String,
}

/// Result of one explanation request; immutable once returned.
#[derive(Debug, Clone)]
pub struct ExplanationBundle {
    pub request_id: String,
    pub class_label: String,
    pub artifacts: ArtifactPaths,
    /// Segmentation regions, then the occlusion summary, then any masking
    /// cells. Never empty.
    pub features: Vec<Feature>,
    pub methods: Vec<MethodReport>,
}

impl From<ExplanationBundle> for ExplainImageResponse {
    fn from(bundle: ExplanationBundle) -> Self {
        ExplainImageResponse {
            lime_image_path: bundle.artifacts.lime,
            occlusion_image_path: bundle.artifacts.occlusion,
            shap_image_path: bundle.artifacts.shap,
            features: bundle.features,
            request_id: bundle.request_id,
            methods: bundle.methods,
        }
    }
}

pub fn default_feature() -> Feature {
    Feature {
        name: "Default Feature".to_string(),
        description: "No specific features could be identified".to_string(),
        impact: 0.0,
    }
}

/// Runs every attribution method for a staged image and persists the
/// overlays. A failing method yields a placeholder artifact and no
/// features; it never fails the request.
#[derive(Clone)]
pub struct Explainer {
    ctx: AppContext,
}

impl Explainer {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn explain(
        &self,
        request_id: &str,
        claimed_label: &str,
    ) -> Result<ExplanationBundle, ExplainError> {
        let bytes = self.ctx.store.read_staged(request_id)?;
        let class = self
            .ctx
            .labels
            .index_of(claimed_label)
            .ok_or_else(|| ExplainError::InvalidClass(claimed_label.to_string()))?;
        log::info!("Generating explanation for request {} ({})", request_id, claimed_label);

        let model = &self.ctx.config.model;
        let image = prepare(&bytes, model.input_size, &self.ctx.config.preprocessing)?;

        let [lime, occlusion, shap] = AttributionMethod::all(&self.ctx.config);
        let (lime_out, (occlusion_out, shap_out)) = rayon::join(
            || self.run_method(&lime, &image, class),
            || {
                rayon::join(
                    || self.run_method(&occlusion, &image, class),
                    || self.run_method(&shap, &image, class),
                )
            },
        );

        let mut features = Vec::new();
        let mut methods = Vec::with_capacity(3);
        let mut persist = |kind: MethodKind, outcome: Result<AttributionResult, AttributionError>| {
            let (overlay, report) = match outcome {
                Ok(result) => {
                    features.extend(result.features);
                    (
                        result.overlay,
                        MethodReport {
                            method: kind,
                            succeeded: true,
                            error: None,
                        },
                    )
                }
                Err(e) => {
                    log::warn!("{} explanation failed for {}: {}", kind, request_id, e);
                    let size = model.input_size;
                    (
                        render::placeholder(size, size, kind.placeholder_label()),
                        MethodReport {
                            method: kind,
                            succeeded: false,
                            error: Some(e.to_string()),
                        },
                    )
                }
            };
            methods.push(report);
            self.ctx.lifecycle.persist(request_id, kind, &overlay)
        };

        let artifacts = ArtifactPaths {
            lime: persist(MethodKind::Lime, lime_out)?,
            occlusion: persist(MethodKind::Occlusion, occlusion_out)?,
            shap: persist(MethodKind::Shap, shap_out)?,
        };

        if features.is_empty() {
            features.push(default_feature());
        }

        Ok(ExplanationBundle {
            request_id: request_id.to_string(),
            class_label: claimed_label.to_string(),
            artifacts,
            features,
            methods,
        })
    }

    fn run_method(
        &self,
        method: &AttributionMethod,
        image: &PreparedImage,
        class: ClassIndex,
    ) -> Result<AttributionResult, AttributionError> {
        let label = self.ctx.labels.label(class);
        let started = std::time::Instant::now();
        let outcome = method.run_isolated(self.ctx.oracle.as_ref(), image, class, label);
        log::info!("{} finished in {:?}", method.kind(), started.elapsed());
        outcome
    }
}
