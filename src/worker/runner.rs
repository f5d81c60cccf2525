use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::job::{ExcInfo, Job, JobStatus};
use crate::queue::Queue;
use crate::registry::CallbackEvent;
use crate::worker::guard::{DeathPenalty, NoOpDeathPenalty, TimerDeathPenalty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Stopped,
}

/// How job functions run relative to the worker's own task.
///
/// `Deferred` spawns each job future on the runtime so a panicking job is
/// isolated from the loop and the death-penalty guard can cut it off.
/// `Inline` awaits the future on the worker's own task with no guard; status
/// and callback outcomes are observably the same, which makes it the mode of
/// choice for deterministic tests, but it enforces no timeout and must not
/// run untrusted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Deferred,
    Inline,
}

/// What execution produced, before it is folded into job status.
enum Outcome {
    Success(Value),
    Error(ExcInfo),
    Stopped,
}

/// Handle for forcing a stop of whatever job a worker is currently running.
#[derive(Clone)]
pub struct StopHandle {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl StopHandle {
    /// Deliver a forced stop to the currently executing job, if any. Returns
    /// whether a job was armed to receive it.
    pub async fn stop_current(&self) -> bool {
        match self.slot.lock().await.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Pulls jobs from its queues one at a time, executes them under the guard,
/// drives the status machine, and dispatches callbacks.
pub struct Worker {
    id: Uuid,
    queues: Vec<Queue>,
    config: WorkerConfig,
    mode: ExecutionMode,
    penalty: Box<dyn DeathPenalty>,
    state: WorkerState,
    current_job: Option<Uuid>,
    current_stop: Arc<Mutex<Option<CancellationToken>>>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Deferred-mode worker with the timer-backed death penalty.
    pub fn new(queues: Vec<Queue>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queues,
            config: WorkerConfig::default(),
            mode: ExecutionMode::Deferred,
            penalty: Box::new(TimerDeathPenalty),
            state: WorkerState::Idle,
            current_job: None,
            current_stop: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Inline-mode worker: executes on the caller's own task, skips the
    /// guard entirely.
    pub fn synchronous(queues: Vec<Queue>) -> Self {
        let mut worker = Self::new(queues);
        worker.mode = ExecutionMode::Inline;
        worker.penalty = Box::new(NoOpDeathPenalty);
        worker
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Substitute the interruption strategy; the worker logic is agnostic to
    /// how the stop signal is produced.
    pub fn with_death_penalty(mut self, penalty: Box<dyn DeathPenalty>) -> Self {
        self.penalty = penalty;
        self
    }

    /// Use an externally owned shutdown token, e.g. from
    /// [`install_shutdown_handler`](crate::shutdown::install_shutdown_handler).
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_job(&self) -> Option<Uuid> {
        self.current_job
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handle for delivering an external forced stop to the current job.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            slot: self.current_stop.clone(),
        }
    }

    /// Run until the shutdown token fires.
    ///
    /// Job and callback failures never escape the loop; store failures
    /// around dequeue are retried with capped exponential backoff.
    pub async fn run(&mut self) -> Result<()> {
        let queues: Vec<&str> = self.queues.iter().map(Queue::name).collect();
        tracing::info!(worker_id = %self.id, ?queues, mode = ?self.mode, "Worker started");
        self.state = WorkerState::Idle;
        let mut backoff = self.config.backoff_base;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.next_job().await {
                Ok(Some((queue, mut job))) => {
                    backoff = self.config.backoff_base;
                    self.execute_one(&queue, &mut job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        worker_id = %self.id,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "Store unavailable during dequeue, backing off"
                    );
                    let jittered = backoff.mul_f64(0.75 + rand::random::<f64>() * 0.5);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(jittered) => {}
                    }
                    backoff = (backoff * 2).min(self.config.backoff_max);
                }
            }
        }

        self.state = WorkerState::Stopped;
        tracing::info!(worker_id = %self.id, "Worker stopped");
        Ok(())
    }

    /// Drain the queues and return the number of jobs executed. Store errors
    /// propagate; burst mode is for controlled environments.
    pub async fn run_burst(&mut self) -> Result<usize> {
        let mut executed = 0;
        while let Some((queue, mut job)) = self.next_job().await? {
            self.execute_one(&queue, &mut job).await;
            executed += 1;
        }
        self.state = WorkerState::Stopped;
        tracing::info!(worker_id = %self.id, executed, "Burst drained");
        Ok(executed)
    }

    async fn execute_one(&mut self, queue: &Queue, job: &mut Job) {
        self.state = WorkerState::Busy;
        self.current_job = Some(job.id);
        if let Err(err) = self.perform_job(queue, job).await {
            // An execution attempt can die on a transition or store error;
            // the loop itself keeps running.
            tracing::error!(job_id = %job.id, error = %err, "Job execution attempt failed");
        }
        self.current_job = None;
        self.state = WorkerState::Idle;
    }

    /// Execute one dequeued job through the full lifecycle: `Started`,
    /// guarded execution, terminal status, callback dispatch.
    pub async fn perform_job(&mut self, queue: &Queue, job: &mut Job) -> Result<()> {
        job.set_status(JobStatus::Started)?;
        job.started_at = Some(Utc::now());
        job.save(queue.store().as_ref(), queue.serializer()).await?;
        tracing::info!(job_id = %job.id, func = %job.func, worker_id = %self.id, "Job started");

        let outcome = match self.mode {
            ExecutionMode::Deferred => self.execute_deferred(queue, job).await,
            ExecutionMode::Inline => Self::execute_inline(queue, job).await,
        };

        match outcome {
            Outcome::Success(value) => self.handle_success(queue, job, value).await,
            Outcome::Error(exc_info) => self.handle_failure(queue, job, exc_info).await,
            Outcome::Stopped => self.dispatch_stopped(queue, job).await.map(drop),
        }
    }

    /// Spawned execution raced against the armed guard. The guard branch is
    /// polled first (`biased`), so a guard firing in the same poll as task
    /// completion deterministically wins.
    async fn execute_deferred(&self, queue: &Queue, job: &Job) -> Outcome {
        let guard = self.penalty.arm(job.timeout);
        *self.current_stop.lock().await = Some(guard.token());

        let outcome = match job.execute(queue.registry()) {
            Err(err) => Outcome::Error(ExcInfo::new("UnknownFunction", err.to_string())),
            Ok(fut) => {
                let mut handle = tokio::spawn(fut);
                tokio::select! {
                    biased;
                    _ = guard.cancelled() => {
                        handle.abort();
                        tracing::warn!(job_id = %job.id, "Forced stop delivered to running job");
                        Outcome::Stopped
                    }
                    join = &mut handle => match join {
                        Ok(Ok(value)) => Outcome::Success(value),
                        Ok(Err(err)) => Outcome::Error(ExcInfo::from_error(&err)),
                        Err(err) if err.is_panic() => {
                            Outcome::Error(ExcInfo::new("Panic", panic_message(err)))
                        }
                        Err(err) => Outcome::Error(ExcInfo::new("TaskAborted", err.to_string())),
                    }
                }
            }
        };

        *self.current_stop.lock().await = None;
        guard.disarm();
        outcome
    }

    /// Same-context execution, no guard, no timeout enforcement.
    async fn execute_inline(queue: &Queue, job: &Job) -> Outcome {
        match job.execute(queue.registry()) {
            Err(err) => Outcome::Error(ExcInfo::new("UnknownFunction", err.to_string())),
            Ok(fut) => match fut.await {
                Ok(value) => Outcome::Success(value),
                Err(err) => Outcome::Error(ExcInfo::from_error(&err)),
            },
        }
    }

    async fn handle_success(&self, queue: &Queue, job: &mut Job, value: Value) -> Result<()> {
        let result = value.clone();
        job.mark_finished(value)?;
        job.save(queue.store().as_ref(), queue.serializer()).await?;
        tracing::info!(job_id = %job.id, status = %job.status(), "Job finished");

        match job.success_callback(queue.registry()) {
            Ok(Some(callback)) => {
                if let Err(err) = callback(job, CallbackEvent::Success(&result)) {
                    // A raising success callback overrides the terminal state;
                    // the callback is not re-invoked and the failure callback
                    // does not fire for it.
                    tracing::error!(job_id = %job.id, error = %err, "Success callback failed, overriding status");
                    job.mark_failed(ExcInfo::new("CallbackError", err.to_string()))?;
                    job.save(queue.store().as_ref(), queue.serializer()).await?;
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "Success callback unresolvable, treated as absent");
            }
        }
        Ok(())
    }

    async fn handle_failure(&self, queue: &Queue, job: &mut Job, exc_info: ExcInfo) -> Result<()> {
        let exc = exc_info.clone();
        job.mark_failed(exc_info)?;
        job.save(queue.store().as_ref(), queue.serializer()).await?;
        tracing::warn!(job_id = %job.id, exc = %exc, "Job failed");

        match job.failure_callback(queue.registry()) {
            Ok(Some(callback)) => {
                if let Err(err) = callback(job, CallbackEvent::Failure(&exc)) {
                    // Terminal status stays Failed; the callback error is only
                    // recorded.
                    tracing::error!(job_id = %job.id, error = %err, "Failure callback failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "Failure callback unresolvable, treated as absent");
            }
        }
        Ok(())
    }

    /// The stop-dispatch path: transition to `Stopped` and invoke the stopped
    /// callback at most once.
    ///
    /// Safe to call again after the fact (deferred notification): a job that
    /// already reached any terminal state through a race is skipped, which is
    /// what guarantees at-most-one stopped-callback invocation. Returns
    /// whether the dispatch actually ran.
    pub async fn dispatch_stopped(&self, queue: &Queue, job: &mut Job) -> Result<bool> {
        if job.status().is_terminal() {
            tracing::debug!(job_id = %job.id, status = %job.status(), "Stop dispatch skipped, job already terminal");
            return Ok(false);
        }
        job.mark_stopped()?;
        job.save(queue.store().as_ref(), queue.serializer()).await?;
        tracing::warn!(job_id = %job.id, "Job stopped");

        match job.stopped_callback(queue.registry()) {
            Ok(Some(callback)) => {
                if let Err(err) = callback(job, CallbackEvent::Stopped) {
                    tracing::error!(job_id = %job.id, error = %err, "Stopped callback failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(job_id = %job.id, error = %err, "Stopped callback unresolvable, treated as absent");
            }
        }
        Ok(true)
    }

    /// Promote due jobs everywhere, then dequeue from the subscribed queues
    /// in list order.
    async fn next_job(&mut self) -> Result<Option<(Queue, Job)>> {
        for queue in &self.queues {
            queue.promote_due().await?;
        }
        for queue in &self.queues {
            if let Some(job) = queue.dequeue().await? {
                return Ok(Some((queue.clone(), job)));
            }
        }
        Ok(None)
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "task panicked".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("queues", &self.queues.len())
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("current_job", &self.current_job)
            .finish()
    }
}
