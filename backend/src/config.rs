use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "XAI_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/explainer.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub preprocessing: NormalizationConfig,
    pub occlusion: OcclusionConfig,
    pub segmentation: SegmentationConfig,
    pub masking: MaskingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: u32,
    pub class_labels: Vec<String>,
    /// Permute NHWC batches to NCHW before inference.
    pub channels_first: bool,
    pub apply_softmax: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "skin_model.pt".to_string(),
            input_size: 224,
            class_labels: vec!["Eczema".into(), "Melanoma".into(), "Psoriasis".into()],
            channels_first: true,
            apply_softmax: true,
        }
    }
}

/// Network input is `(pixel * scale - mean) / std` per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    pub patch_size: usize,
    pub stride: usize,
    pub max_patches: usize,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            patch_size: 28,
            stride: 14,
            max_patches: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub n_segments: usize,
    pub compactness: f32,
    pub max_iterations: usize,
    pub num_samples: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub num_features: usize,
    pub kernel_width: f32,
    pub ridge_alpha: f32,
    /// `None` fills each hidden segment with its own mean colour.
    pub hide_color: Option<f32>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            n_segments: 50,
            compactness: 30.0,
            max_iterations: 10,
            num_samples: 50,
            batch_size: 10,
            seed: 42,
            num_features: 5,
            kernel_width: 0.25,
            ridge_alpha: 1.0,
            hide_color: Some(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    pub max_evals: usize,
    pub batch_size: usize,
    pub min_region: usize,
    pub emit_regions: bool,
    pub num_features: usize,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            max_evals: 20,
            batch_size: 5,
            min_region: 8,
            emit_regions: false,
            num_features: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub staging_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("temp_images"),
            artifact_dir: PathBuf::from("explanation_images"),
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

impl AppConfig {
    /// Loads the config named by `XAI_CONFIG`, then the default path, then
    /// falls back to built-in defaults. `PORT` overrides the server port.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(DEFAULT_CONFIG_PATH)?
            }
            Err(_) => {
                log::warn!("No config file found, using built-in defaults");
                Self::default()
            }
        };

        if let Ok(port) = std::env::var("PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PORT is not a valid port: {}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading configuration from {}", path.display());
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        if config_str.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.model.class_labels.is_empty() {
            return invalid("model.class_labels must not be empty");
        }
        if self.model.input_size == 0 {
            return invalid("model.input_size must be positive");
        }
        if self.preprocessing.std.iter().any(|s| *s == 0.0) {
            return invalid("preprocessing.std must not contain zeros");
        }
        if self.occlusion.patch_size == 0 || self.occlusion.stride == 0 {
            return invalid("occlusion.patch_size and occlusion.stride must be positive");
        }
        if self.occlusion.patch_size > self.model.input_size as usize {
            return invalid("occlusion.patch_size exceeds model.input_size");
        }
        if self.occlusion.max_patches == 0 {
            return invalid("occlusion.max_patches must be positive");
        }
        if self.segmentation.n_segments == 0 || self.segmentation.num_samples == 0 {
            return invalid("segmentation.n_segments and segmentation.num_samples must be positive");
        }
        if self.segmentation.batch_size == 0 || self.masking.batch_size == 0 {
            return invalid("batch sizes must be positive");
        }
        if self.segmentation.kernel_width <= 0.0 {
            return invalid("segmentation.kernel_width must be positive");
        }
        if self.masking.max_evals < 2 {
            return invalid("masking.max_evals must allow the full and fully-masked evaluations");
        }
        if self.masking.min_region == 0 {
            return invalid("masking.min_region must be positive");
        }
        if self.storage.ttl_secs == 0 {
            return invalid("storage.ttl_secs must be positive");
        }
        Ok(())
    }
}
