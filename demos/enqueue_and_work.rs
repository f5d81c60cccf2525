//! Enqueue a handful of jobs and drain them with a burst worker.
//!
//! ```text
//! cargo run --example enqueue_and_work -- --jobs 5 --fail-every 3
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use taskmill::{
    BoxError, CallbackEvent, FunctionRegistry, Job, JobOptions, MemoryStore, Queue, TaskFuture,
    TaskInput, Worker,
};

#[derive(Parser, Debug)]
#[command(name = "enqueue-and-work")]
#[command(about = "Demo producer and worker over an in-memory store")]
struct Args {
    /// Queue name to use
    #[arg(long, default_value = "demo")]
    queue: String,

    /// Number of jobs to enqueue
    #[arg(long, default_value_t = 5)]
    jobs: u32,

    /// Make every Nth job fail (0 disables failures)
    #[arg(long, default_value_t = 0)]
    fail_every: u32,

    /// Keep the worker running after the queue drains, until Ctrl-C
    #[arg(long)]
    watch: bool,
}

fn greet(input: TaskInput) -> TaskFuture {
    Box::pin(async move {
        let who = input
            .args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("world")
            .to_string();
        Ok(json!(format!("hello, {who}")))
    })
}

fn always_fails(_input: TaskInput) -> TaskFuture {
    Box::pin(async move { Err(BoxError::from("this job was built to fail")) })
}

fn report_success(job: &Job, event: CallbackEvent<'_>) -> Result<(), BoxError> {
    if let CallbackEvent::Success(result) = event {
        println!("job {} finished: {result}", job.id);
    }
    Ok(())
}

fn report_failure(job: &Job, event: CallbackEvent<'_>) -> Result<(), BoxError> {
    if let CallbackEvent::Failure(exc_info) = event {
        println!("job {} failed: {exc_info}", job.id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut registry = FunctionRegistry::new();
    registry
        .register_task("demo.greet", greet)
        .register_task("demo.always_fails", always_fails)
        .register_callback("demo.report_success", report_success)
        .register_callback("demo.report_failure", report_failure);

    let queue = Queue::new(
        args.queue.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(registry),
    );

    for i in 0..args.jobs {
        let failing = args.fail_every > 0 && i % args.fail_every == args.fail_every - 1;
        let func = if failing { "demo.always_fails" } else { "demo.greet" };
        let opts = JobOptions::new()
            .on_success("demo.report_success")
            .on_failure("demo.report_failure")
            .timeout(Duration::from_secs(10));
        queue
            .enqueue(func, vec![json!(format!("job #{i}"))], Map::new(), opts)
            .await?;
    }
    println!("enqueued {} jobs on {:?}", args.jobs, args.queue);

    if args.watch {
        let shutdown = taskmill::shutdown::install_shutdown_handler();
        let mut worker = Worker::new(vec![queue]).with_shutdown(shutdown);
        worker.run().await?;
    } else {
        let mut worker = Worker::new(vec![queue]);
        let executed = worker.run_burst().await?;
        println!("worker drained {executed} jobs");
    }
    Ok(())
}
