//! taskmill: a distributed job queue with lifecycle callbacks.
//!
//! Producers enqueue units of work (a registered task name plus arguments)
//! into named queues backed by a shared store; workers dequeue and execute
//! them under a timeout guard, track lifecycle state, and dispatch
//! success/failure/stopped callbacks exactly as the job reaches its terminal
//! state.

pub mod callback;
pub mod config;
pub mod error;
pub mod job;
pub mod queue;
pub mod registry;
pub mod serializer;
pub mod shutdown;
pub mod store;
pub mod worker;

pub use callback::{CallbackRef, CallbackSlot};
pub use config::WorkerConfig;
pub use error::{Result, TaskmillError};
pub use job::{ExcInfo, Job, JobOptions, JobStatus};
pub use queue::Queue;
pub use registry::{BoxError, CallbackEvent, FunctionRegistry, TaskFuture, TaskInput};
pub use serializer::Serializer;
pub use store::{MemoryStore, Store};
pub use worker::{ExecutionMode, StopHandle, Worker, WorkerState};
