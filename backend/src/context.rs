use ndarray::Array4;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::model::labels::ClassLabels;
use crate::model::oracle::{Oracle, OracleError};
use crate::storage::lifecycle::ArtifactLifecycle;
use crate::storage::ImageStore;

/// Everything a request handler needs, built once at startup.
///
/// Construction verifies the oracle against the label list, so a context
/// that exists is ready to serve.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub labels: Arc<ClassLabels>,
    pub oracle: Arc<dyn Oracle>,
    pub store: Arc<dyn ImageStore>,
    pub lifecycle: ArtifactLifecycle,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        oracle: Arc<dyn Oracle>,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, OracleError> {
        let labels = ClassLabels::new(config.model.class_labels.clone());
        verify_oracle(oracle.as_ref(), &labels, config.model.input_size as usize)?;
        let lifecycle = ArtifactLifecycle::new(store.clone(), config.storage.ttl_secs);
        Ok(Self {
            config: Arc::new(config),
            labels: Arc::new(labels),
            oracle,
            store,
            lifecycle,
        })
    }
}

fn verify_oracle(
    oracle: &dyn Oracle,
    labels: &ClassLabels,
    input_size: usize,
) -> Result<(), OracleError> {
    if oracle.num_classes() != labels.len() {
        return Err(OracleError::ShapeMismatch {
            expected: format!("{} classes", labels.len()),
            got: format!("{} classes", oracle.num_classes()),
        });
    }
    let zeros = Array4::<f32>::zeros((1, input_size, input_size, 3));
    let out = oracle.predict(zeros.view())?;
    if out.shape() != [1, labels.len()] {
        return Err(OracleError::ShapeMismatch {
            expected: format!("[1, {}]", labels.len()),
            got: format!("{:?}", out.shape()),
        });
    }
    log::info!("Model verified with test prediction");
    Ok(())
}
