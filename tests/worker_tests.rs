//! End-to-end worker loop tests: guarded execution, terminal states,
//! interruption, and loop resilience.


use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use fixtures::{assert_eventually, stop_record_count, success_order, test_queue, test_registry};
use taskmill::{
    Job, JobOptions, JobStatus, MemoryStore, Queue, Result, Store, TaskmillError, Worker,
    WorkerConfig, WorkerState,
};

fn no_args() -> (Vec<Value>, Map<String, Value>) {
    (Vec::new(), Map::new())
}

#[tokio::test]
async fn deferred_worker_runs_job_to_finished() {
    let queue = test_queue("deferred-success");
    let (_, kwargs) = no_args();
    let job = queue
        .enqueue(
            "tests.say_hello",
            vec![json!("Frank")],
            kwargs,
            JobOptions::new(),
        )
        .await
        .unwrap();

    let mut worker = Worker::new(vec![queue.clone()]);
    assert_eq!(worker.state(), WorkerState::Idle);
    assert_eq!(worker.run_burst().await.unwrap(), 1);
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(worker.current_job().is_none());

    let job = Job::fetch(queue.store().as_ref(), queue.serializer(), job.id)
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Finished);
    assert_eq!(job.result, Some(json!("Hi there, Frank!")));
    assert!(job.started_at.is_some());
    assert!(job.ended_at.is_some());
}

#[tokio::test]
async fn worker_survives_consecutive_failures() {
    let queue = test_queue("failure-streak");
    let mut failing = Vec::new();
    for _ in 0..5 {
        let (args, kwargs) = no_args();
        failing.push(
            queue
                .enqueue("tests.div_by_zero", args, kwargs, JobOptions::new())
                .await
                .unwrap()
                .id,
        );
    }
    let (args, kwargs) = no_args();
    let survivor = queue
        .enqueue("tests.say_hello", args, kwargs, JobOptions::new())
        .await
        .unwrap()
        .id;

    let mut worker = Worker::new(vec![queue.clone()]);
    assert_eq!(worker.run_burst().await.unwrap(), 6);

    for id in failing {
        let job = Job::fetch(queue.store().as_ref(), queue.serializer(), id)
            .await
            .unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
    }
    let job = Job::fetch(queue.store().as_ref(), queue.serializer(), survivor)
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Finished);
}

#[tokio::test]
async fn timeout_stops_overrunning_job() {
    let queue = test_queue("timeout");
    let (args, kwargs) = no_args();
    let job = queue
        .enqueue(
            "tests.long_process",
            args,
            kwargs,
            JobOptions::new()
                .timeout(Duration::from_millis(50))
                .on_stopped("tests.record_stop"),
        )
        .await
        .unwrap();

    let mut worker = Worker::new(vec![queue.clone()]);
    assert_eq!(worker.run_burst().await.unwrap(), 1);

    let mut stopped = Job::fetch(queue.store().as_ref(), queue.serializer(), job.id)
        .await
        .unwrap();
    assert_eq!(stopped.status(), JobStatus::Stopped);
    assert_eq!(stop_record_count(job.id), 1);

    // Re-running the stop-dispatch path after the fact stays a no-op.
    let worker = Worker::new(vec![queue.clone()]);
    assert!(!worker.dispatch_stopped(&queue, &mut stopped).await.unwrap());
    assert_eq!(stop_record_count(job.id), 1);
}

#[tokio::test]
async fn panicking_job_folds_into_failed() {
    let queue = test_queue("panic");
    let (args, kwargs) = no_args();
    let job = queue
        .enqueue("tests.kaboom", args, kwargs, JobOptions::new())
        .await
        .unwrap();

    let mut worker = Worker::new(vec![queue.clone()]);
    assert_eq!(worker.run_burst().await.unwrap(), 1);
    assert_eq!(worker.state(), WorkerState::Stopped);

    let job = Job::fetch(queue.store().as_ref(), queue.serializer(), job.id)
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    let exc = job.exc_info.expect("panic captured");
    assert_eq!(exc.exc_type, "Panic");
    assert!(exc.message.contains("kaboom"));
}

#[tokio::test]
async fn inline_mode_enforces_no_timeout() {
    let queue = test_queue("inline-timeout");
    let (args, kwargs) = no_args();
    let job = queue
        .enqueue(
            "tests.short_nap",
            args,
            kwargs,
            JobOptions::new()
                .timeout(Duration::from_millis(1))
                .on_stopped("tests.record_stop"),
        )
        .await
        .unwrap();

    let mut worker = Worker::synchronous(vec![queue.clone()]);
    assert_eq!(worker.run_burst().await.unwrap(), 1);

    let job = Job::fetch(queue.store().as_ref(), queue.serializer(), job.id)
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Finished);
    assert_eq!(job.result, Some(json!("well rested")));
    assert_eq!(stop_record_count(job.id), 0);
}

#[tokio::test]
async fn external_stop_forces_stopped_state() {
    let queue = test_queue("external-stop");
    let (args, kwargs) = no_args();
    let id = queue
        .enqueue(
            "tests.long_process",
            args,
            kwargs,
            JobOptions::new().on_stopped("tests.record_stop"),
        )
        .await
        .unwrap()
        .id;

    let mut worker = Worker::new(vec![queue.clone()]).with_config(
        WorkerConfig::new().with_poll_interval(Duration::from_millis(10)),
    );
    let stop = worker.stop_handle();
    let shutdown = worker.shutdown_token();
    let loop_handle = tokio::spawn(async move { worker.run().await });

    assert_eventually(
        || {
            let queue = queue.clone();
            async move {
                let job = Job::fetch(queue.store().as_ref(), queue.serializer(), id)
                    .await
                    .unwrap();
                job.status() == JobStatus::Started
            }
        },
        Duration::from_secs(2),
        "job should reach Started",
    )
    .await;

    // The guard is armed an instant after Started is persisted; keep asking
    // until the handle actually reaches an armed job.
    assert_eventually(
        || {
            let stop = stop.clone();
            async move { stop.stop_current().await }
        },
        Duration::from_secs(2),
        "stop handle should reach the armed job",
    )
    .await;

    assert_eventually(
        || {
            let queue = queue.clone();
            async move {
                let job = Job::fetch(queue.store().as_ref(), queue.serializer(), id)
                    .await
                    .unwrap();
                job.status() == JobStatus::Stopped
            }
        },
        Duration::from_secs(2),
        "job should reach Stopped",
    )
    .await;
    assert_eq!(stop_record_count(id), 1);

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn queues_drain_in_subscription_order() {
    let store = Arc::new(MemoryStore::new());
    let registry = test_registry();
    let high = Queue::new("high", store.clone(), registry.clone());
    let low = Queue::new("low", store, registry);

    let (_, kwargs) = no_args();
    let low_job = low
        .enqueue(
            "tests.say_hello",
            vec![json!("low")],
            kwargs.clone(),
            JobOptions::new().on_success("tests.save_result"),
        )
        .await
        .unwrap();
    let high_job = high
        .enqueue(
            "tests.say_hello",
            vec![json!("high")],
            kwargs,
            JobOptions::new().on_success("tests.save_result"),
        )
        .await
        .unwrap();

    let mut worker = Worker::new(vec![high.clone(), low.clone()]);
    assert_eq!(worker.run_burst().await.unwrap(), 2);

    // The high queue is drained first even though its job arrived later.
    assert_eq!(
        success_order(&[high_job.id, low_job.id]),
        vec![high_job.id, low_job.id]
    );
}

/// Store wrapper that fails list pops until the fuse burns down, for
/// exercising the worker's dequeue retry path.
#[derive(Clone)]
struct FlakyStore {
    inner: MemoryStore,
    failures_left: Arc<AtomicUsize>,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn rpush(&self, key: &str, member: String) -> Result<()> {
        self.inner.rpush(key, member).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(TaskmillError::StoreUnavailable(
                "connection reset by peer".to_string(),
            ));
        }
        self.inner.lpop(key).await
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.inner.llen(key).await
    }

    async fn zadd(&self, key: &str, score: i64, member: String) -> Result<()> {
        self.inner.zadd(key, score, member).await
    }

    async fn zpop_le(&self, key: &str, max_score: i64) -> Result<Vec<String>> {
        self.inner.zpop_le(key, max_score).await
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.inner.zcard(key).await
    }
}

#[tokio::test]
async fn dequeue_outage_is_retried_with_backoff() {
    let store = Arc::new(FlakyStore::new(3));
    let queue = Queue::new("flaky", store, test_registry());
    let (args, kwargs) = no_args();
    let id = queue
        .enqueue("tests.say_hello", args, kwargs, JobOptions::new())
        .await
        .unwrap()
        .id;

    let mut worker = Worker::new(vec![queue.clone()]).with_config(
        WorkerConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_backoff(Duration::from_millis(5), Duration::from_millis(40)),
    );
    let shutdown = worker.shutdown_token();
    let loop_handle = tokio::spawn(async move { worker.run().await });

    assert_eventually(
        || {
            let queue = queue.clone();
            async move {
                let job = Job::fetch(queue.store().as_ref(), queue.serializer(), id)
                    .await
                    .unwrap();
                job.status() == JobStatus::Finished
            }
        },
        Duration::from_secs(2),
        "job should finish once the store recovers",
    )
    .await;

    shutdown.cancel();
    loop_handle.await.unwrap().unwrap();
}
