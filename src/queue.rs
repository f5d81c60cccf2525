//! Named queues: a FIFO pending list plus a time-ordered scheduled set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::job::{Job, JobOptions, JobStatus};
use crate::registry::FunctionRegistry;
use crate::serializer::Serializer;
use crate::store::Store;

/// A named job queue over the shared store.
///
/// The pending list holds ids of jobs awaiting a free worker in FIFO order;
/// the scheduled set holds ids of delayed jobs keyed by their due time. A job
/// record is always persisted before its id becomes visible in the pending
/// list, so a dequeued id always has a backing record barring explicit
/// deletion.
#[derive(Clone)]
pub struct Queue {
    name: String,
    store: Arc<dyn Store>,
    registry: Arc<FunctionRegistry>,
    serializer: Serializer,
}

impl Queue {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn Store>,
        registry: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            registry,
            serializer: Serializer::default(),
        }
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    fn pending_key(&self) -> String {
        format!("taskmill:queue:{}", self.name)
    }

    fn scheduled_key(&self) -> String {
        format!("taskmill:scheduled:{}", self.name)
    }

    /// Create a job and make it immediately pending.
    ///
    /// Callback validation happens before anything touches the store; the
    /// record is saved before the id is pushed.
    pub async fn enqueue(
        &self,
        func: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        opts: JobOptions,
    ) -> Result<Job> {
        let mut job = Job::create(func, args, kwargs, opts, &self.registry)?;
        job.origin = Some(self.name.clone());
        job.enqueued_at = Some(Utc::now());
        job.save(self.store.as_ref(), self.serializer).await?;
        self.store
            .rpush(&self.pending_key(), job.id.to_string())
            .await?;
        tracing::debug!(job_id = %job.id, queue = %self.name, func = %job.func, "Job enqueued");
        Ok(job)
    }

    /// Create a job due `delay` from now.
    pub async fn enqueue_in(
        &self,
        delay: Duration,
        func: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        opts: JobOptions,
    ) -> Result<Job> {
        let due = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.enqueue_at(due, func, args, kwargs, opts).await
    }

    /// Create a job due at an absolute instant.
    pub async fn enqueue_at(
        &self,
        due: DateTime<Utc>,
        func: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        opts: JobOptions,
    ) -> Result<Job> {
        let mut job = Job::create(func, args, kwargs, opts, &self.registry)?;
        job.origin = Some(self.name.clone());
        job.place(JobStatus::Scheduled);
        job.save(self.store.as_ref(), self.serializer).await?;
        self.store
            .zadd(
                &self.scheduled_key(),
                due.timestamp_millis(),
                job.id.to_string(),
            )
            .await?;
        tracing::debug!(job_id = %job.id, queue = %self.name, due = %due, "Job scheduled");
        Ok(job)
    }

    /// Pop the earliest pending job, or `None` when the queue is empty.
    ///
    /// The underlying pop is atomic, so no two workers claim the same id.
    /// Ids whose record has vanished (explicitly deleted) are skipped.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        loop {
            let Some(raw) = self.store.lpop(&self.pending_key()).await? else {
                return Ok(None);
            };
            let Ok(id) = raw.parse::<Uuid>() else {
                tracing::warn!(queue = %self.name, member = %raw, "Discarding malformed pending id");
                continue;
            };
            match Job::fetch(self.store.as_ref(), self.serializer, id).await {
                Ok(job) => return Ok(Some(job)),
                Err(crate::error::TaskmillError::JobNotFound(_)) => {
                    tracing::warn!(job_id = %id, queue = %self.name, "Pending id had no record, skipping");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Move every scheduled job whose due time has elapsed into the pending
    /// list, flipping it `Scheduled -> Queued`. Returns the number moved.
    pub async fn promote_due(&self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let due = self.store.zpop_le(&self.scheduled_key(), now).await?;
        let mut moved = 0;
        for raw in due {
            let Ok(id) = raw.parse::<Uuid>() else {
                tracing::warn!(queue = %self.name, member = %raw, "Discarding malformed scheduled id");
                continue;
            };
            let mut job = match Job::fetch(self.store.as_ref(), self.serializer, id).await {
                Ok(job) => job,
                Err(crate::error::TaskmillError::JobNotFound(_)) => {
                    tracing::warn!(job_id = %id, queue = %self.name, "Scheduled id had no record, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            job.set_status(JobStatus::Queued)?;
            job.enqueued_at = Some(Utc::now());
            job.save(self.store.as_ref(), self.serializer).await?;
            self.store
                .rpush(&self.pending_key(), job.id.to_string())
                .await?;
            moved += 1;
        }
        if moved > 0 {
            tracing::debug!(queue = %self.name, moved, "Promoted due jobs");
        }
        Ok(moved)
    }

    /// Explicitly re-enqueue a terminal job for a fresh cycle. The previous
    /// result or failure is cleared and the job becomes pending again.
    pub async fn requeue(&self, job: &mut Job) -> Result<()> {
        job.reset_for_requeue()?;
        job.origin = Some(self.name.clone());
        job.enqueued_at = Some(Utc::now());
        job.save(self.store.as_ref(), self.serializer).await?;
        self.store
            .rpush(&self.pending_key(), job.id.to_string())
            .await?;
        tracing::info!(job_id = %job.id, queue = %self.name, "Job requeued");
        Ok(())
    }

    /// Number of pending jobs.
    pub async fn len(&self) -> Result<usize> {
        self.store.llen(&self.pending_key()).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Number of scheduled (not yet due) jobs.
    pub async fn scheduled_len(&self) -> Result<usize> {
        self.store.zcard(&self.scheduled_key()).await
    }

    /// Drop the pending list and scheduled set. Job records are left in
    /// place; sweeping them is the embedding application's concern.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.pending_key()).await?;
        self.store.delete(&self.scheduled_key()).await?;
        tracing::info!(queue = %self.name, "Queue cleared");
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("serializer", &self.serializer)
            .finish()
    }
}
