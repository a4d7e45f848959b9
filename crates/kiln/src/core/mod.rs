//! # Worker Hosting
//!
//! * [`worker`] - Owns the background task that hosts an isolated context.
//!   The `WorkerHandle` type spawns the task, wakes it, and shuts it down
//!   gracefully once the last controller lets go of the boundary.
pub mod worker;
