use ndarray::{Array2, ArrayView4};
use std::sync::{Arc, Mutex};
use tch::{nn::ModuleT, CModule, Device, Kind, Tensor};

use crate::config::ModelConfig;
use crate::model::oracle::{Oracle, OracleError};

/// TorchScript classifier. Calls are serialized through the module lock.
#[derive(Clone)]
pub struct TorchOracle {
    model: Arc<Mutex<CModule>>,
    device: Device,
    num_classes: usize,
    channels_first: bool,
    apply_softmax: bool,
}

impl TorchOracle {
    pub fn load(config: &ModelConfig) -> Result<Self, OracleError> {
        let device = Device::cuda_if_available();
        log::info!("Loading TorchScript model from {} on {:?}", config.path, device);
        let model = CModule::load_on_device(&config.path, device)
            .map_err(|e| OracleError::Unavailable(format!("{}: {}", config.path, e)))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
            num_classes: config.class_labels.len(),
            channels_first: config.channels_first,
            apply_softmax: config.apply_softmax,
        })
    }
}

impl Oracle for TorchOracle {
    fn predict(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, OracleError> {
        let shape: Vec<i64> = batch.shape().iter().map(|d| *d as i64).collect();
        let n = batch.shape()[0];
        let data: Vec<f32> = batch.iter().copied().collect();

        let mut input = Tensor::from_slice(&data).view(shape.as_slice()).to_device(self.device);
        if self.channels_first {
            input = input.permute([0, 3, 1, 2]).contiguous();
        }

        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| OracleError::Unavailable("model lock poisoned".to_string()))?;
            tch::no_grad(|| model.forward_t(&input, false))
        };
        let output = if self.apply_softmax {
            output.softmax(-1, Kind::Float)
        } else {
            output.to_kind(Kind::Float)
        };

        let output_flat = output.to_device(Device::Cpu).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        if num_elements != n * self.num_classes {
            return Err(OracleError::ShapeMismatch {
                expected: format!("[{}, {}]", n, self.num_classes),
                got: format!("{:?}", output.size()),
            });
        }
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);

        Array2::from_shape_vec((n, self.num_classes), output_vec)
            .map_err(|e| OracleError::Inference(e.to_string()))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
