//! # Kiln
//!
//! Commissioned, interruptible batch inference across an isolated worker
//! boundary.
//!
//! ## Overview
//!
//! A [`Controller`] drives a [`RunExecutor`] that lives in an isolated context.
//! The two sides share no state: every command travels as a JSON frame tagged
//! with a fresh correlation id, and the executor answers each one exactly once
//! with a response carrying the same id. An outstanding command is a
//! *commission*; it settles with the matching response, times out, or fails when
//! the isolated context goes away.
//!
//! A run steps through its samples one at a time. Between two samples the
//! executor reaches a checkpoint where queued control messages land, so a run
//! can be paused, resumed or cancelled without ever interrupting inference on a
//! single sample. Progress is reported after every sample.
//!
//! ## Architecture
//!
//! - [`communication`] - Wire messages, JSON framing and the boundary itself
//! - [`controller`] - Commissions, phase waiters, progress and the facade
//! - [`executor`] - The isolated run loop
//! - [`backend`] - The inference engine contract, with an optional Candle engine
//! - [`core`] - Hosting the isolated context on a background task
//! - [`config`] - TOML configuration with environment overrides
//!
//! ## Example
//!
//! ```ignore
//! use kiln::{Controller, KilnConfig, SetupConfig};
//!
//! async fn example<E: kiln::backend::InferenceEngine>(engine: E) {
//!     let controller = Controller::spawn(&KilnConfig::default(), engine);
//!     controller.setup_worker(SetupConfig::default()).await;
//!     controller.load_model("model.safetensors").await;
//!
//!     let outputs = controller.run(vec![vec![0.5, 1.5], vec![2.0, 3.0]]).await;
//!     assert_eq!(outputs.len(), 2);
//! }
//! ```
//!
//! ## Features
//!
//! - **candle** - Enables the Candle dense-layer engine

pub mod backend;
pub mod communication;
pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod executor;

pub use config::{load_config, ControllerConfig, ExecutorConfig, KilnConfig, SetupConfig};
pub use controller::{Controller, ModelState, Phase, RunProgress, RunState};
pub use error::{CommissionError, ControlError};
pub use executor::RunExecutor;
