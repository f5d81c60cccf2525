
use std::time::Duration;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use fixtures::{test_queue, test_registry};
use taskmill::{
    ExcInfo, FunctionRegistry, Job, JobOptions, JobStatus, MemoryStore, Serializer, TaskmillError,
};

fn no_args() -> (Vec<Value>, Map<String, Value>) {
    (Vec::new(), Map::new())
}

#[test]
fn create_rejects_unknown_task() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let err = Job::create("tests.not_a_task", args, kwargs, JobOptions::new(), &registry)
        .unwrap_err();
    assert!(matches!(err, TaskmillError::UnknownFunction(name) if name == "tests.not_a_task"));
}

#[test]
fn create_rejects_unregistered_callbacks() {
    let registry = test_registry();
    for opts in [
        JobOptions::new().on_success("tests.nope"),
        JobOptions::new().on_failure("tests.nope"),
        JobOptions::new().on_stopped("tests.nope"),
    ] {
        let (args, kwargs) = no_args();
        let err = Job::create("tests.say_hello", args, kwargs, opts, &registry).unwrap_err();
        assert!(matches!(err, TaskmillError::InvalidCallback(name) if name == "tests.nope"));
    }
}

#[test]
fn callback_cache_settles_to_absent_on_first_access() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let mut job = Job::create("tests.say_hello", args, kwargs, JobOptions::new(), &registry)
        .unwrap();

    assert!(job.success_callback_name().is_none());
    assert!(job.success_callback_cache().is_unevaluated());

    assert!(job.success_callback(&registry).unwrap().is_none());
    assert!(job.success_callback_cache().is_absent());

    // The settled state is sticky.
    assert!(job.success_callback(&registry).unwrap().is_none());
    assert!(job.success_callback_cache().is_absent());
}

#[test]
fn callback_cache_resolves_to_present() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let mut job = Job::create(
        "tests.say_hello",
        args,
        kwargs,
        JobOptions::new().on_success("tests.save_result"),
        &registry,
    )
    .unwrap();

    assert_eq!(job.success_callback_name(), Some("tests.save_result"));
    assert!(job.success_callback_cache().is_unevaluated());

    assert!(job.success_callback(&registry).unwrap().is_some());
    assert!(job.success_callback_cache().is_present());
}

#[test]
fn unresolvable_callback_leaves_cache_unevaluated() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let mut job = Job::create(
        "tests.say_hello",
        args,
        kwargs,
        JobOptions::new().on_failure("tests.save_exception"),
        &registry,
    )
    .unwrap();

    // A worker built without this callback cannot resolve the name.
    let bare = FunctionRegistry::new();
    let err = job.failure_callback(&bare).unwrap_err();
    assert!(matches!(err, TaskmillError::UnresolvableCallback(_)));
    assert!(job.failure_callback_cache().is_unevaluated());

    // A later attempt against a complete registry succeeds.
    assert!(job.failure_callback(&registry).unwrap().is_some());
    assert!(job.failure_callback_cache().is_present());
}

#[test]
fn illegal_transitions_are_rejected() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let mut job = Job::create("tests.say_hello", args, kwargs, JobOptions::new(), &registry)
        .unwrap();

    // Cannot finish a job that never started.
    let err = job.set_status(JobStatus::Finished).unwrap_err();
    assert!(matches!(
        err,
        TaskmillError::InvalidTransition {
            from: JobStatus::Queued,
            to: JobStatus::Finished
        }
    ));

    job.set_status(JobStatus::Started).unwrap();
    job.mark_finished(json!("ok")).unwrap();
    assert_eq!(job.status(), JobStatus::Finished);

    // Terminal states never go back to Started.
    let err = job.set_status(JobStatus::Started).unwrap_err();
    assert!(matches!(err, TaskmillError::InvalidTransition { .. }));
}

#[test]
fn terminal_payloads_follow_status() {
    let registry = test_registry();
    let (args, kwargs) = no_args();
    let mut job = Job::create("tests.say_hello", args, kwargs, JobOptions::new(), &registry)
        .unwrap();
    job.set_status(JobStatus::Started).unwrap();
    job.mark_finished(json!("the result")).unwrap();

    assert_eq!(job.result, Some(json!("the result")));
    assert!(job.exc_info.is_none());
    assert!(job.ended_at.is_some());

    // Success-callback override drops the would-be result.
    job.mark_failed(ExcInfo::new("CallbackError", "broken")).unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.result.is_none());
    assert_eq!(job.exc_info, Some(ExcInfo::new("CallbackError", "broken")));
}

#[tokio::test]
async fn save_fetch_round_trip_preserves_everything() {
    for serializer in [Serializer::MessagePack, Serializer::Json] {
        let registry = test_registry();
        let store = MemoryStore::new();
        let mut kwargs = Map::new();
        kwargs.insert("retries".to_string(), json!(2));

        let mut job = Job::create(
            "tests.div_by_zero",
            vec![json!(42)],
            kwargs.clone(),
            JobOptions::new()
                .on_success("tests.save_result")
                .on_failure("tests.save_exception")
                .on_stopped("tests.record_stop")
                .timeout(Duration::from_secs(90))
                .description("round trip probe"),
            &registry,
        )
        .unwrap();
        job.set_status(JobStatus::Started).unwrap();
        job.mark_failed(ExcInfo::new("TaskError", "integer division by zero"))
            .unwrap();
        job.save(&store, serializer).await.unwrap();

        let fetched = Job::fetch(&store, serializer, job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.func, "tests.div_by_zero");
        assert_eq!(fetched.args, vec![json!(42)]);
        assert_eq!(fetched.kwargs, kwargs);
        assert_eq!(fetched.status(), JobStatus::Failed);
        assert!(fetched.result.is_none());
        assert_eq!(
            fetched.exc_info,
            Some(ExcInfo::new("TaskError", "integer division by zero"))
        );
        assert_eq!(fetched.timeout, Some(Duration::from_secs(90)));
        assert_eq!(fetched.description.as_deref(), Some("round trip probe"));
        assert_eq!(fetched.success_callback_name(), Some("tests.save_result"));
        assert_eq!(fetched.failure_callback_name(), Some("tests.save_exception"));
        assert_eq!(fetched.stopped_callback_name(), Some("tests.record_stop"));
        assert_eq!(fetched.created_at, job.created_at);
        assert_eq!(fetched.ended_at, job.ended_at);

        // Caches never travel with the record.
        assert!(fetched.success_callback_cache().is_unevaluated());
        assert!(fetched.failure_callback_cache().is_unevaluated());
        assert!(fetched.stopped_callback_cache().is_unevaluated());
    }
}

#[tokio::test]
async fn fetch_unknown_id_is_job_not_found() {
    let store = MemoryStore::new();
    let id = Uuid::new_v4();
    let err = Job::fetch(&store, Serializer::default(), id).await.unwrap_err();
    assert!(matches!(err, TaskmillError::JobNotFound(missing) if missing == id));
}

#[tokio::test]
async fn refresh_reloads_persisted_state() {
    let queue = test_queue("refresh");
    let (args, kwargs) = no_args();
    let mut local = queue
        .enqueue("tests.say_hello", args, kwargs, JobOptions::new())
        .await
        .unwrap();

    // Another holder of the job advances it in the store.
    let mut remote = Job::fetch(queue.store().as_ref(), queue.serializer(), local.id)
        .await
        .unwrap();
    remote.set_status(JobStatus::Started).unwrap();
    remote.mark_finished(json!("done elsewhere")).unwrap();
    remote
        .save(queue.store().as_ref(), queue.serializer())
        .await
        .unwrap();

    assert_eq!(local.status(), JobStatus::Queued);
    local
        .refresh(queue.store().as_ref(), queue.serializer())
        .await
        .unwrap();
    assert_eq!(local.status(), JobStatus::Finished);
    assert_eq!(local.result, Some(json!("done elsewhere")));
}
