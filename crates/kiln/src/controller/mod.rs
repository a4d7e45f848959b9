//! # Controller
//!
//! The caller's side of the boundary.
//!
//! * [`Controller`] - Facade exposing load, run, pause, resume and cancel
//! * [`CommissionRegistry`] - Matches responses to the commands awaiting them
//! * [`WaiterRegistry`] - Lets callers wait for a phase to complete
//! * [`RunProgress`] - Completion of the current run

mod commission;
mod facade;
mod progress;
mod waiter;

pub use commission::{CommissionRegistry, Pending, Settlement};
pub use facade::{Controller, ModelState, RunState};
pub use progress::RunProgress;
pub use waiter::{Phase, Waiter, WaiterRegistry};
