use std::path::Path;
use std::sync::Mutex;

use shared::ModelStage;
use tch::{CModule, Device, Kind, Tensor};

use super::config::TensorLayout;
use super::error::InferenceError;
use super::types::{batched, NormalizedTensor, ScoreVector};
use crate::model::{warm_up, ScorePredictor};

impl From<(ModelStage, tch::TchError)> for InferenceError {
    fn from((stage, err): (ModelStage, tch::TchError)) -> Self {
        InferenceError::inference_failure(stage, err.to_string())
    }
}

/// TorchScript classifier exported from the training pipeline.
pub struct TorchPredictor {
    stage: ModelStage,
    module: Mutex<CModule>,
    device: Device,
    layout: TensorLayout,
    output_classes: usize,
    emits_distribution: bool,
}

impl TorchPredictor {
    pub fn load(
        stage: ModelStage,
        path: &Path,
        layout: TensorLayout,
        input_size: u32,
        emits_distribution: bool,
    ) -> Result<Self, InferenceError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device).map_err(|e| {
            InferenceError::ModelUnavailable {
                stage,
                reason: format!("{}: {}", path.display(), e),
            }
        })?;
        let mut predictor = Self {
            stage,
            module: Mutex::new(module),
            device,
            layout,
            output_classes: 0,
            emits_distribution,
        };
        let output_classes = warm_up(stage, input_size, |t| predictor.forward(t))?;
        predictor.output_classes = output_classes;
        Ok(predictor)
    }

    fn to_input(&self, tensor: &NormalizedTensor) -> Tensor {
        let batch = batched(tensor, self.layout);
        let shape: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = batch.iter().copied().collect();
        Tensor::from_slice(&data)
            .view(shape.as_slice())
            .to_device(self.device)
    }

    fn forward(&self, tensor: &NormalizedTensor) -> Result<ScoreVector, InferenceError> {
        let input = self.to_input(tensor);
        let module = self.module.lock().map_err(|_| {
            InferenceError::inference_failure(self.stage, "model lock poisoned")
        })?;
        let output = tch::no_grad(|| module.forward_ts(&[input]))
            .map_err(|e| InferenceError::from((self.stage, e)))?;
        let output_flat = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(ScoreVector::new(output_vec))
    }
}

impl ScorePredictor for TorchPredictor {
    fn predict(&self, tensor: &NormalizedTensor) -> Result<ScoreVector, InferenceError> {
        self.forward(tensor)
    }

    fn output_classes(&self) -> usize {
        self.output_classes
    }

    fn emits_distribution(&self) -> bool {
        self.emits_distribution
    }
}
