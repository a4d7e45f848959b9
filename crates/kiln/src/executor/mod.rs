//! # Run Executor
//!
//! The isolated context: owns the inference session, steps through the samples
//! of a run one at a time, and answers the controller only through frames.
//!
//! * [`RunExecutor`] - Serves commands arriving on an [`Endpoint`](crate::communication::Endpoint)
//! * [`ActiveRun`] - Per-run buffer of samples and results

mod handler;
mod run;

pub use handler::RunExecutor;
pub use run::ActiveRun;
