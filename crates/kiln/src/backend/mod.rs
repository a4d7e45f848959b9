//! # Inference Backend
//!
//! This module defines the contract the run executor consumes from an
//! inference engine, so the orchestration logic stays independent of any
//! particular runtime.
//!
//! ## Feature Flags
//!
//! - `candle`: Enables a small dense-layer engine backed by the Candle tensor library
//!
//! ## Usage
//!
//! 1. Implement [`InferenceEngine`] and [`InferenceSession`] for your runtime,
//!    or enable a bundled backend
//! 2. Hand the engine to a [`SpawnedExecutor`](crate::communication::SpawnedExecutor)
//! 3. Drive it through a [`Controller`](crate::controller::Controller)

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle inference backend.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It loads a safetensors artifact holding a `weight` matrix and an optional
/// `bias` vector and evaluates one dense layer per sample.
pub mod candle;

pub use core_trait::*;


#[cfg(test)]
/// Mock inference engine.
///
/// Sums each sample and records every input it sees
pub(crate) mod mock;
