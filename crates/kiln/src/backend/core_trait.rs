use std::collections::BTreeMap;
use std::path::Path;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Named outputs of one inference call, each flattened to a vector.
pub type OutputMap = BTreeMap<String, Vec<f32>>;

/// A dense `f32` tensor built from one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTensor {
    pub data: Vec<f32>,
    pub dims: Vec<usize>,
}

impl InputTensor {
    /// Shapes a sample for inference.
    ///
    /// With no declared `dimensions` the sample becomes a single row
    /// `[1, sample.len()]`. Otherwise the tensor takes shape `[1, dimensions..]`
    /// and the sample must fill it exactly.
    pub fn from_sample(sample: &[f32], dimensions: &[usize]) -> Result<Self, EngineError> {
        if dimensions.is_empty() {
            return Ok(Self {
                data: sample.to_vec(),
                dims: vec![1, sample.len()],
            });
        }

        let expected = dimensions.iter().product::<usize>();
        if expected != sample.len() {
            return Err(EngineError::Shape {
                expected,
                actual: sample.len(),
            });
        }

        let mut dims = Vec::with_capacity(dimensions.len() + 1);
        dims.push(1);
        dims.extend_from_slice(dimensions);
        Ok(Self {
            data: sample.to_vec(),
            dims,
        })
    }
}

/// Turns a model artifact into a runnable session.
///
/// The engine is owned by the isolated context; the controller never touches it.
#[async_trait]
pub trait InferenceEngine: Send + Sync + 'static {
    type Session: InferenceSession;

    /// Load the artifact at `path`. A failure leaves no session behind.
    async fn create_session(&self, path: &Path) -> Result<Self::Session, EngineError>;
}

/// A loaded model able to evaluate one input at a time.
///
/// A call to [`run`](InferenceSession::run) is treated as atomic: the run loop
/// never interrupts it.
#[async_trait]
pub trait InferenceSession: Send + Sync + 'static {
    async fn run(&self, input: &InputTensor) -> Result<OutputMap, EngineError>;
}
