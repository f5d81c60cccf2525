//! Name-based resolution of task and callback functions.
//!
//! Jobs and callbacks are persisted as plain name strings so a job created in
//! one process can be executed in another. The registry is the per-process
//! table that maps those names back to code. Only plain `fn` pointers can be
//! registered: a capturing closure does not coerce to `fn`, so anything that
//! reaches the registry is a free function with a stable name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::callback::CallbackRef;
use crate::error::{Result, TaskmillError};
use crate::job::{ExcInfo, Job};

/// Boxed error returned by task functions and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a task function.
pub type TaskFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, BoxError>> + Send>>;

/// A registered unit of work. Receives the job's deserialized inputs and
/// produces a result value or an error that the worker folds into the job's
/// terminal state.
pub type TaskFn = fn(TaskInput) -> TaskFuture;

/// A registered lifecycle callback. Synchronous and side-effecting; an `Err`
/// is treated the way the worker treats a raising callback (see the worker
/// module docs).
pub type CallbackFn = fn(&Job, CallbackEvent<'_>) -> std::result::Result<(), BoxError>;

/// Inputs handed to a task function.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl TaskInput {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }
}

/// What happened to the job, as seen by a callback.
///
/// Success callbacks receive the job result, failure callbacks the captured
/// exception info, stopped callbacks only the job itself.
#[derive(Debug)]
pub enum CallbackEvent<'a> {
    Success(&'a Value),
    Failure(&'a ExcInfo),
    Stopped,
}

/// Per-process table of task functions and callbacks, keyed by name.
#[derive(Default)]
pub struct FunctionRegistry {
    tasks: HashMap<String, TaskFn>,
    callbacks: HashMap<String, CallbackFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task function under `name`. Re-registering a name replaces
    /// the previous binding.
    pub fn register_task(&mut self, name: impl Into<String>, func: TaskFn) -> &mut Self {
        let name = name.into();
        if self.tasks.insert(name.clone(), func).is_some() {
            tracing::debug!(task = %name, "Task re-registered");
        }
        self
    }

    /// Register a callback function under `name`.
    pub fn register_callback(&mut self, name: impl Into<String>, func: CallbackFn) -> &mut Self {
        let name = name.into();
        if self.callbacks.insert(name.clone(), func).is_some() {
            tracing::debug!(callback = %name, "Callback re-registered");
        }
        self
    }

    /// Look up a task function by name.
    pub fn resolve_task(&self, name: &str) -> Result<TaskFn> {
        self.tasks
            .get(name)
            .copied()
            .ok_or_else(|| TaskmillError::UnknownFunction(name.to_string()))
    }

    /// Validate a callback name at job-creation time. Fails with
    /// [`TaskmillError::InvalidCallback`] so the producer learns about a bad
    /// reference before the job is ever persisted.
    pub fn validate_callback(&self, name: &str) -> Result<CallbackRef> {
        if self.callbacks.contains_key(name) {
            Ok(CallbackRef::new(name))
        } else {
            Err(TaskmillError::InvalidCallback(name.to_string()))
        }
    }

    /// Resolve a persisted callback name in the current process. Fails with
    /// [`TaskmillError::UnresolvableCallback`] when the name is no longer
    /// registered here, e.g. a worker built from older code.
    pub fn resolve_callback(&self, name: &str) -> Result<CallbackFn> {
        self.callbacks
            .get(name)
            .copied()
            .ok_or_else(|| TaskmillError::UnresolvableCallback(name.to_string()))
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn callback_names(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("tasks", &self.tasks.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}
