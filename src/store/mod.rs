//! The shared store consumed by queues, jobs, and workers.
//!
//! The store is the single source of truth for job and queue state. It is
//! deliberately small: key-value records for jobs, FIFO lists for pending
//! queues, and a score-ordered set for delayed jobs. Implementations must
//! make [`Store::lpop`] an atomic pop-or-none so that exactly one worker
//! claims each pending id.
//!
//! Connection-class failures surface as
//! [`TaskmillError::StoreUnavailable`](crate::error::TaskmillError) and
//! propagate to whichever enqueue/dequeue/save/fetch call touched the store;
//! the worker loop wraps dequeue in retry with backoff.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Returns whether a value was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Append `member` to the tail of the list at `key`.
    async fn rpush(&self, key: &str, member: String) -> Result<()>;

    /// Atomically pop the head of the list at `key`, or `None` when empty.
    /// No two concurrent callers may receive the same member.
    async fn lpop(&self, key: &str) -> Result<Option<String>>;

    /// Length of the list at `key` (0 when absent).
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Insert `member` into the scored set at `key`. Re-adding a member
    /// updates its score.
    async fn zadd(&self, key: &str, score: i64, member: String) -> Result<()>;

    /// Atomically remove and return all members with score <= `max_score`,
    /// ordered by (score, member).
    async fn zpop_le(&self, key: &str, max_score: i64) -> Result<Vec<String>>;

    /// Number of members in the scored set at `key` (0 when absent).
    async fn zcard(&self, key: &str) -> Result<usize>;
}

pub use memory::MemoryStore;
