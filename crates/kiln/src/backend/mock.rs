use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;

use crate::backend::{InferenceEngine, InferenceSession, InputTensor, OutputMap};
use crate::error::EngineError;

// A mock engine for testing: outputs the sum of each sample, fails any sample
// whose first element is negative, and refuses to load `missing.onnx`.
#[derive(Clone, Default)]
pub struct MockEngine {
    seen: Arc<Mutex<Vec<Vec<f32>>>>,
    delay: Option<Duration>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Every input evaluated so far, in order
    pub fn seen(&self) -> Vec<Vec<f32>> {
        self.seen.lock().unwrap().clone()
    }
}

pub struct MockSession {
    seen: Arc<Mutex<Vec<Vec<f32>>>>,
    delay: Option<Duration>,
}

#[async_trait]
impl InferenceEngine for MockEngine {
    type Session = MockSession;

    async fn create_session(&self, path: &Path) -> Result<Self::Session, EngineError> {
        if path.file_name().is_some_and(|name| name == "missing.onnx") {
            return Err(EngineError::Load {
                path: path.to_path_buf(),
                reason: "no such artifact".to_string(),
            });
        }
        Ok(MockSession {
            seen: self.seen.clone(),
            delay: self.delay,
        })
    }
}

#[async_trait]
impl InferenceSession for MockSession {
    async fn run(&self, input: &InputTensor) -> Result<OutputMap, EngineError> {
        self.seen.lock().unwrap().push(input.data.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if input.data.first().is_some_and(|first| *first < 0.0) {
            return Err(EngineError::Inference("negative sample".to_string()));
        }
        let mut output = OutputMap::new();
        output.insert("sum".to_string(), vec![input.data.iter().sum()]);
        Ok(output)
    }
}

/// The output the mock produces for a successful sample.
pub fn expected_output(sample: &[f32]) -> OutputMap {
    let mut output = OutputMap::new();
    output.insert("sum".to_string(), vec![sample.iter().sum()]);
    output
}
