use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::OutputMap;

/// One input row of a batch.
pub type Sample = Vec<f32>;

/// Token tying a response to the command that asked for it.
///
/// A fresh v4 UUID is drawn for every command, so an id is never reused while
/// its commission is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of command a commission was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    SetupWorker,
    LoadModel,
    Run,
    Pause,
    Resume,
    Cancel,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::SetupWorker => "setup-worker",
            Action::LoadModel => "load-model",
            Action::Run => "run",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// A command sent from the controller to the isolated context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Command {
    SetupWorker {
        #[serde(rename = "rootPath")]
        root_path: PathBuf,
    },
    LoadModel {
        path: PathBuf,
        dimensions: Vec<usize>,
    },
    Run {
        samples: Vec<Sample>,
    },
    Pause,
    Resume,
    Cancel,
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::SetupWorker { .. } => Action::SetupWorker,
            Command::LoadModel { .. } => Action::LoadModel,
            Command::Run { .. } => Action::Run,
            Command::Pause => Action::Pause,
            Command::Resume => Action::Resume,
            Command::Cancel => Action::Cancel,
        }
    }
}

/// A command tagged with the id of the commission waiting for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,

    #[serde(flatten)]
    pub command: Command,
}

/// Outcome of inference on one sample.
///
/// Both fields are `None` until the sample has been processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleResult {
    pub success: Option<bool>,
    pub value: Option<OutputMap>,
}

impl SampleResult {
    pub fn succeeded(value: OutputMap) -> Self {
        Self {
            success: Some(true),
            value: Some(value),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: Some(false),
            value: None,
        }
    }
}

/// Answer to exactly one [`Envelope`], matched by `correlation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,

    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SampleResult>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<usize>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl Response {
    pub fn ok(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            success: true,
            error: None,
            results: None,
            complete: None,
            cancelled: false,
        }
    }

    pub fn failed(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok(correlation_id)
        }
    }

    pub fn with_results(mut self, results: Vec<SampleResult>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_complete(mut self, complete: usize) -> Self {
        self.complete = Some(complete);
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.cancelled = true;
        self
    }
}

/// Unsolicited report emitted after every processed sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Correlation id of the `run` commission this progress belongs to
    #[serde(rename = "runId")]
    pub run_id: CorrelationId,

    pub complete: usize,

    /// Per-sample success flags so far, `None` for samples not yet processed
    pub success: Vec<Option<bool>>,
}

/// Everything the isolated context sends back across the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum WorkerMessage {
    Response(Response),
    Progress(ProgressReport),
}

/// Actions a receiver knows how to decode.
///
/// Frames naming any other action surface as
/// [`Inbound::Unrecognized`](super::Inbound::Unrecognized).
pub trait Message: Serialize + serde::de::DeserializeOwned {
    const ACTIONS: &'static [&'static str];
}

impl Message for Envelope {
    const ACTIONS: &'static [&'static str] = &[
        "setup-worker",
        "load-model",
        "run",
        "pause",
        "resume",
        "cancel",
    ];
}

impl Message for WorkerMessage {
    const ACTIONS: &'static [&'static str] = &["response", "progress"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_flattens_action_beside_correlation_id() {
        let id = CorrelationId::new();
        let envelope = Envelope {
            correlation_id: id,
            command: Command::Pause,
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["action"], "pause");
        assert_eq!(value["correlationId"], id.to_string());
    }

    #[test]
    fn test_setup_worker_uses_camel_case_root_path() {
        let envelope = Envelope {
            correlation_id: CorrelationId::new(),
            command: Command::SetupWorker { root_path: PathBuf::from("/models") },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["action"], "setup-worker");
        assert_eq!(value["rootPath"], "/models");
    }

    #[test]
    fn test_command_action_matches_wire_tag() {
        let commands = vec![
            Command::SetupWorker { root_path: PathBuf::from(".") },
            Command::LoadModel { path: PathBuf::from("model.onnx"), dimensions: vec![1, 3] },
            Command::Run { samples: vec![vec![1.0]] },
            Command::Pause,
            Command::Resume,
            Command::Cancel,
        ];

        for command in commands {
            let value = serde_json::to_value(&command).unwrap();
            assert_eq!(value["action"], command.action().to_string());
        }
    }

    #[test]
    fn test_response_omits_empty_payload() {
        let response = Response::ok(CorrelationId::new());
        let value = serde_json::to_value(WorkerMessage::Response(response)).unwrap();

        assert_eq!(value["action"], "response");
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
        assert!(value.get("results").is_none());
        assert!(value.get("cancelled").is_none());
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
    }
}
