use std::path::Path;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};

use super::{InferenceEngine, InferenceSession, InputTensor, OutputMap};
use crate::error::EngineError;

/// Loads safetensors artifacts onto a candle [`Device`].
pub struct CandleEngine {
    device: Device,
}

impl CandleEngine {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn cpu() -> Self {
        Self::new(Device::Cpu)
    }
}

/// One dense layer: `output = input · weight + bias`.
pub struct CandleSession {
    weight: Tensor,
    bias: Option<Tensor>,
    device: Device,
}

#[async_trait]
impl InferenceEngine for CandleEngine {
    type Session = CandleSession;

    async fn create_session(&self, path: &Path) -> Result<Self::Session, EngineError> {
        let load_error = |reason: String| EngineError::Load {
            path: path.to_path_buf(),
            reason,
        };

        let mut tensors = candle_core::safetensors::load(path, &self.device)
            .map_err(|e| load_error(e.to_string()))?;
        let weight = tensors
            .remove("weight")
            .ok_or_else(|| load_error("artifact has no `weight` tensor".to_string()))?
            .to_dtype(DType::F32)
            .map_err(|e| load_error(e.to_string()))?;
        if weight.rank() != 2 {
            return Err(load_error(format!("`weight` must be rank 2, got {:?}", weight.dims())));
        }
        let bias = tensors
            .remove("bias")
            .map(|bias| bias.to_dtype(DType::F32))
            .transpose()
            .map_err(|e| load_error(e.to_string()))?;

        Ok(CandleSession {
            weight,
            bias,
            device: self.device.clone(),
        })
    }
}

#[async_trait]
impl InferenceSession for CandleSession {
    async fn run(&self, input: &InputTensor) -> Result<OutputMap, EngineError> {
        let inference_error = |e: candle_core::Error| EngineError::Inference(e.to_string());

        // flatten everything after the batch dimension into one row
        let features = input.data.len();
        let row = Tensor::from_vec(input.data.clone(), (1, features), &self.device)
            .map_err(inference_error)?;
        let mut output = row.matmul(&self.weight).map_err(inference_error)?;
        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias).map_err(inference_error)?;
        }
        let values = output
            .flatten_all()
            .and_then(|flat| flat.to_vec1::<f32>())
            .map_err(inference_error)?;

        let mut outputs = OutputMap::new();
        outputs.insert("output".to_string(), values);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_artifact(name: &str, tensors: &HashMap<String, Tensor>) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("kiln-{}-{}.safetensors", name, std::process::id()));
        candle_core::safetensors::save(tensors, &path).unwrap();
        path
    }

    #[tokio::test]
    async fn test_dense_layer_with_bias() {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        // two inputs, two outputs: swaps the features
        tensors.insert("weight".to_string(), Tensor::new(&[[0f32, 1.], [1., 0.]], &device).unwrap());
        tensors.insert("bias".to_string(), Tensor::new(&[10f32, 20.], &device).unwrap());
        let path = write_artifact("dense", &tensors);

        let session = CandleEngine::cpu().create_session(&path).await.unwrap();
        let input = InputTensor::from_sample(&[1.0, 2.0], &[]).unwrap();
        let output = session.run(&input).await.unwrap();

        assert_eq!(output.get("output"), Some(&vec![12.0, 21.0]));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_wrong_width_is_an_inference_error() {
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert("weight".to_string(), Tensor::new(&[[1f32], [1.]], &device).unwrap());
        let path = write_artifact("narrow", &tensors);

        let session = CandleEngine::cpu().create_session(&path).await.unwrap();
        let input = InputTensor::from_sample(&[1.0, 2.0, 3.0], &[]).unwrap();

        assert!(matches!(session.run(&input).await, Err(EngineError::Inference(_))));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_artifact_without_weight_fails_to_load() {
        let mut tensors = HashMap::new();
        tensors.insert("bias".to_string(), Tensor::new(&[1f32], &Device::Cpu).unwrap());
        let path = write_artifact("headless", &tensors);

        let result = CandleEngine::cpu().create_session(&path).await;
        assert!(matches!(result, Err(EngineError::Load { .. })));
        let _ = std::fs::remove_file(path);
    }
}
