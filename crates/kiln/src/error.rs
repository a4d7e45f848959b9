//! Error types for every layer of the crate.
//!
//! Errors are split along the boundary they belong to: protocol errors come from
//! decoding frames, commission errors from waiting on the other side of the
//! boundary, engine errors from the inference backend, and control errors from
//! issuing a command in a state that cannot accept it.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::communication::Action;
use crate::controller::ModelState;

/// A frame could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match the message shape
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame carried no string `action` field
    #[error("frame has no action")]
    MissingAction,

    /// A message could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A commission did not settle with a successful response.
#[derive(Debug, Error)]
pub enum CommissionError {
    /// The isolated context closed its side of the boundary
    #[error("isolated context disconnected")]
    Disconnected,

    /// No response arrived within the configured timeout
    #[error("{action} commission timed out after {after:?}")]
    TimedOut {
        action: Action,
        after: Duration,
    },

    /// The isolated context answered with `success: false`
    #[error("{action} commission rejected: {reason}")]
    Rejected {
        action: Action,
        reason: String,
    },

    /// The command could not be put on the wire
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Failure reported by an inference backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The model artifact could not be turned into a session
    #[error("failed to load model from {path}: {reason}")]
    Load {
        path: PathBuf,
        reason: String,
    },

    /// Evaluating one input failed
    #[error("inference failed: {0}")]
    Inference(String),

    /// The sample does not fit the declared input dimensions
    #[error("sample has {actual} elements, dimensions expect {expected}")]
    Shape {
        expected: usize,
        actual: usize,
    },
}

/// A controller command could not proceed.
///
/// Everything except [`ControlError::Commission`] is decided locally and never
/// reaches the isolated context.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("a run is already in progress")]
    RunInProgress,

    #[error("model is not ready to run (state: {0})")]
    ModelNotReady(ModelState),

    #[error("a model load is already in progress")]
    LoadInProgress,

    #[error("no samples to run")]
    EmptyBatch,

    #[error("no run is currently running")]
    NotRunning,

    #[error("no run is currently paused")]
    NotPaused,

    #[error("no run is in progress")]
    Idle,

    #[error(transparent)]
    Commission(#[from] CommissionError),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
