//! The unit of work: identity, payload, lifecycle status, and callbacks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::callback::CallbackSlot;
use crate::error::{Result, TaskmillError};
use crate::registry::{BoxError, CallbackFn, FunctionRegistry, TaskFuture, TaskInput};
use crate::serializer::Serializer;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Scheduled,
    Started,
    Finished,
    Failed,
    Stopped,
}

impl JobStatus {
    /// Terminal states receive no further automatic transition; only an
    /// explicit requeue starts a fresh cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Started => write!(f, "started"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// The allowed status transitions.
///
/// `Finished -> Failed` is the success-callback override path; terminal
/// states back to `Queued` are explicit requeues. Everything else is a
/// programming or race error and is rejected.
fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Queued, Started)
            | (Scheduled, Queued)
            | (Started, Finished)
            | (Started, Failed)
            | (Started, Stopped)
            | (Finished, Failed)
            | (Finished, Queued)
            | (Failed, Queued)
            | (Stopped, Queued)
    )
}

/// Captured failure information, persisted with the job so the failure
/// survives the process that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcInfo {
    pub exc_type: String,
    pub message: String,
}

impl ExcInfo {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &BoxError) -> Self {
        Self::new("TaskError", err.to_string())
    }
}

impl std::fmt::Display for ExcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.exc_type, self.message)
    }
}

/// Per-job options accepted by the enqueue methods.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
    pub on_stopped: Option<String>,
    pub timeout: Option<Duration>,
    pub description: Option<String>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl Into<String>) -> Self {
        self.on_success = Some(callback.into());
        self
    }

    pub fn on_failure(mut self, callback: impl Into<String>) -> Self {
        self.on_failure = Some(callback.into());
        self
    }

    pub fn on_stopped(mut self, callback: impl Into<String>) -> Self {
        self.on_stopped = Some(callback.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A unit of enqueued work.
///
/// Status is private and only changes through the transition-checked methods;
/// the callback slots are lazy caches that are never persisted.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub func: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    status: JobStatus,
    pub result: Option<Value>,
    pub exc_info: Option<ExcInfo>,
    pub timeout: Option<Duration>,
    pub description: Option<String>,
    /// Name of the queue the job was enqueued on.
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    success_callback_name: Option<String>,
    failure_callback_name: Option<String>,
    stopped_callback_name: Option<String>,
    success_callback: CallbackSlot,
    failure_callback: CallbackSlot,
    stopped_callback: CallbackSlot,
}

impl Job {
    /// Create a job, validating the task name and every supplied callback
    /// against the registry before anything is persisted. An invalid callback
    /// fails here, producer-side, and the job is never created.
    pub fn create(
        func: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        opts: JobOptions,
        registry: &FunctionRegistry,
    ) -> Result<Job> {
        let func = func.into();
        registry.resolve_task(&func)?;

        let validate = |name: &Option<String>| -> Result<Option<String>> {
            match name {
                Some(n) => Ok(Some(registry.validate_callback(n)?.into())),
                None => Ok(None),
            }
        };
        let success_callback_name = validate(&opts.on_success)?;
        let failure_callback_name = validate(&opts.on_failure)?;
        let stopped_callback_name = validate(&opts.on_stopped)?;

        Ok(Job {
            id: Uuid::new_v4(),
            func,
            args,
            kwargs,
            status: JobStatus::Queued,
            result: None,
            exc_info: None,
            timeout: opts.timeout,
            description: opts.description,
            origin: None,
            created_at: Utc::now(),
            enqueued_at: None,
            started_at: None,
            ended_at: None,
            success_callback_name,
            failure_callback_name,
            stopped_callback_name,
            success_callback: CallbackSlot::Unevaluated,
            failure_callback: CallbackSlot::Unevaluated,
            stopped_callback: CallbackSlot::Unevaluated,
        })
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Initial placement by the owning queue (`Queued` vs `Scheduled`); not a
    /// lifecycle transition.
    pub(crate) fn place(&mut self, status: JobStatus) {
        self.status = status;
    }

    /// Transition to `status`, enforcing the transition table.
    pub fn set_status(&mut self, status: JobStatus) -> Result<()> {
        if !is_valid_transition(self.status, status) {
            return Err(TaskmillError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        Ok(())
    }

    /// `Started -> Finished` with the result attached.
    pub fn mark_finished(&mut self, result: Value) -> Result<()> {
        self.set_status(JobStatus::Finished)?;
        self.result = Some(result);
        self.exc_info = None;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Transition to `Failed` with captured failure info. Also covers the
    /// success-callback override (`Finished -> Failed`), which drops the
    /// would-be result.
    pub fn mark_failed(&mut self, exc_info: ExcInfo) -> Result<()> {
        self.set_status(JobStatus::Failed)?;
        self.exc_info = Some(exc_info);
        self.result = None;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// `Started -> Stopped` after a forced interruption.
    pub fn mark_stopped(&mut self) -> Result<()> {
        self.set_status(JobStatus::Stopped)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Reset a terminal job for a fresh cycle (`-> Queued`), clearing the
    /// previous outcome.
    pub(crate) fn reset_for_requeue(&mut self) -> Result<()> {
        self.set_status(JobStatus::Queued)?;
        self.result = None;
        self.exc_info = None;
        self.started_at = None;
        self.ended_at = None;
        Ok(())
    }

    pub fn success_callback_name(&self) -> Option<&str> {
        self.success_callback_name.as_deref()
    }

    pub fn failure_callback_name(&self) -> Option<&str> {
        self.failure_callback_name.as_deref()
    }

    pub fn stopped_callback_name(&self) -> Option<&str> {
        self.stopped_callback_name.as_deref()
    }

    /// Current resolution state of the success-callback cache.
    pub fn success_callback_cache(&self) -> CallbackSlot {
        self.success_callback
    }

    pub fn failure_callback_cache(&self) -> CallbackSlot {
        self.failure_callback
    }

    pub fn stopped_callback_cache(&self) -> CallbackSlot {
        self.stopped_callback
    }

    /// Resolve the success callback, settling the lazy cache on first access.
    ///
    /// Returns `Ok(None)` when no callback was attached. A resolution failure
    /// surfaces as [`TaskmillError::UnresolvableCallback`] and leaves the
    /// cache unevaluated, so the callback is only treated as absent for that
    /// invocation.
    pub fn success_callback(&mut self, registry: &FunctionRegistry) -> Result<Option<CallbackFn>> {
        Self::resolve_slot(
            &mut self.success_callback,
            self.success_callback_name.as_deref(),
            registry,
        )
    }

    pub fn failure_callback(&mut self, registry: &FunctionRegistry) -> Result<Option<CallbackFn>> {
        Self::resolve_slot(
            &mut self.failure_callback,
            self.failure_callback_name.as_deref(),
            registry,
        )
    }

    pub fn stopped_callback(&mut self, registry: &FunctionRegistry) -> Result<Option<CallbackFn>> {
        Self::resolve_slot(
            &mut self.stopped_callback,
            self.stopped_callback_name.as_deref(),
            registry,
        )
    }

    fn resolve_slot(
        slot: &mut CallbackSlot,
        name: Option<&str>,
        registry: &FunctionRegistry,
    ) -> Result<Option<CallbackFn>> {
        match *slot {
            CallbackSlot::Present(f) => Ok(Some(f)),
            CallbackSlot::Absent => Ok(None),
            CallbackSlot::Unevaluated => match name {
                None => {
                    *slot = CallbackSlot::Absent;
                    Ok(None)
                }
                Some(n) => {
                    let f = registry.resolve_callback(n)?;
                    *slot = CallbackSlot::Present(f);
                    Ok(Some(f))
                }
            },
        }
    }

    /// Invoke the job's task function in the current execution context.
    ///
    /// Does not change status; the caller drives the state machine so the
    /// timeout guard can interpose between execution and the status write.
    pub fn execute(&self, registry: &FunctionRegistry) -> Result<TaskFuture> {
        let func = registry.resolve_task(&self.func)?;
        Ok(func(TaskInput::new(self.args.clone(), self.kwargs.clone())))
    }

    /// Persist the full job state under its record key.
    pub async fn save(&self, store: &dyn Store, serializer: Serializer) -> Result<()> {
        let bytes = serializer.encode(&JobRecord::from(self))?;
        store.set(&job_key(self.id), bytes).await
    }

    /// Reload a job from its persisted record.
    pub async fn fetch(store: &dyn Store, serializer: Serializer, id: Uuid) -> Result<Job> {
        let bytes = store
            .get(&job_key(id))
            .await?
            .ok_or(TaskmillError::JobNotFound(id))?;
        let record: JobRecord = serializer.decode(&bytes)?;
        Ok(record.into_job())
    }

    /// Replace in-memory state with the currently persisted record.
    pub async fn refresh(&mut self, store: &dyn Store, serializer: Serializer) -> Result<()> {
        *self = Job::fetch(store, serializer, self.id).await?;
        Ok(())
    }
}

/// Store key for a job record.
pub fn job_key(id: Uuid) -> String {
    format!("taskmill:job:{id}")
}

/// Persisted form of a [`Job`]. Status travels as its lowercase string and
/// the timeout as whole seconds; the callback caches are not persisted.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    id: Uuid,
    func: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    status: JobStatus,
    result: Option<Value>,
    exc_info: Option<ExcInfo>,
    timeout_secs: Option<u64>,
    description: Option<String>,
    origin: Option<String>,
    created_at: DateTime<Utc>,
    enqueued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    success_callback: Option<String>,
    failure_callback: Option<String>,
    stopped_callback: Option<String>,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        JobRecord {
            id: job.id,
            func: job.func.clone(),
            args: job.args.clone(),
            kwargs: job.kwargs.clone(),
            status: job.status,
            result: job.result.clone(),
            exc_info: job.exc_info.clone(),
            timeout_secs: job.timeout.map(|t| t.as_secs()),
            description: job.description.clone(),
            origin: job.origin.clone(),
            created_at: job.created_at,
            enqueued_at: job.enqueued_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
            success_callback: job.success_callback_name.clone(),
            failure_callback: job.failure_callback_name.clone(),
            stopped_callback: job.stopped_callback_name.clone(),
        }
    }
}

impl JobRecord {
    fn into_job(self) -> Job {
        Job {
            id: self.id,
            func: self.func,
            args: self.args,
            kwargs: self.kwargs,
            status: self.status,
            result: self.result,
            exc_info: self.exc_info,
            timeout: self.timeout_secs.map(Duration::from_secs),
            description: self.description,
            origin: self.origin,
            created_at: self.created_at,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            success_callback_name: self.success_callback,
            failure_callback_name: self.failure_callback,
            stopped_callback_name: self.stopped_callback,
            success_callback: CallbackSlot::Unevaluated,
            failure_callback: CallbackSlot::Unevaluated,
            stopped_callback: CallbackSlot::Unevaluated,
        }
    }
}
