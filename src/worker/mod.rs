//! Worker execution engine for running jobs.
//!
//! This module drives a job from dequeue to its terminal state:
//! - **Execution**: resolves the job's task function through the registry and
//!   runs it, deferred (spawned, panic-isolated) or inline
//! - **Timeout enforcement**: races execution against the death-penalty guard
//! - **Callback dispatch**: invokes the matching success/failure/stopped
//!   callback after the terminal status is written
//!
//! # Components
//!
//! - [`Worker`]: the single-job-at-a-time loop over one or more queues
//! - [`guard`]: the pluggable death-penalty guard strategies
//!
//! # Execution Flow
//!
//! 1. The loop promotes due scheduled jobs, then dequeues in queue order
//! 2. The job transitions to `Started` and is persisted
//! 3. Deferred mode arms the guard and spawns the task future; the guard
//!    branch wins ties against completion
//! 4. The outcome is folded into `Finished`/`Failed`/`Stopped` and the
//!    matching callback runs on the worker's own path
//!
//! No job failure, callback failure, or panic escapes the loop; store
//! failures around dequeue are retried with backoff.

pub mod guard;
pub mod runner;

pub use guard::{ArmedGuard, DeathPenalty, NoOpDeathPenalty, TimerDeathPenalty};
pub use runner::{ExecutionMode, StopHandle, Worker, WorkerState};
