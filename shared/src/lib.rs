use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The three attribution procedures an explanation is built from.
///
/// The string form doubles as the artifact name suffix and the wire
/// identifier, so it must stay stable.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MethodKind {
    /// Segmentation + local linear surrogate.
    Lime,
    /// Patch occlusion sensitivity.
    Occlusion,
    /// Masked sampling with additive attribution.
    Shap,
}

impl MethodKind {
    pub fn placeholder_label(&self) -> &'static str {
        match self {
            MethodKind::Lime => "LIME ERROR",
            MethodKind::Occlusion => "OCCLUSION ERROR",
            MethodKind::Shap => "SHAP ERROR",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionInfo {
    pub request_id: String,
    pub filename: Option<String>,
    pub all_probabilities: BTreeMap<String, f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub condition: String,
    pub confidence: f32,
    pub additional_info: PredictionInfo,
}

/// The part of a prior prediction an explanation request has to echo back.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImageResult {
    pub condition: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExplainImageRequest {
    pub request_id: String,
    pub image_result: ImageResult,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub impact: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MethodReport {
    pub method: MethodKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExplainImageResponse {
    pub lime_image_path: String,
    pub occlusion_image_path: String,
    pub shap_image_path: String,
    pub features: Vec<Feature>,
    pub request_id: String,
    #[serde(default)]
    pub methods: Vec<MethodReport>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusResponse {
    pub status: String,
    pub model_loaded: bool,
    pub class_labels: Vec<String>,
}
