use std::time::Duration;

/// Tuning knobs for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when every subscribed queue is empty.
    pub poll_interval: Duration,
    /// Initial backoff after a store failure during dequeue.
    pub backoff_base: Duration,
    /// Ceiling for the exponential backoff.
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }
}
