//! Lease-based job queue.
//!
//! This crate provides:
//! - The `JobQueue` trait: enqueue, bounded-wait lease, heartbeat,
//!   complete, release and delayed requeue
//! - Priority-then-FIFO ordering
//! - Redelivery on lease expiry with a dead-letter ceiling
//! - In-memory and Redis implementations

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;
use vscrub_models::{DeadLetter, JobId, QueueDepth, QueueEntry, WorkerId};

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobQueue;
pub use redis_queue::RedisJobQueue;

/// Delivery channel between submitters and workers.
///
/// A leased entry is invisible to other `lease` calls until its lease
/// expires; expiry without a heartbeat makes it visible again with its
/// delivery count incremented. Operations on an entry the caller no longer
/// holds fail with [`QueueError::LeaseLost`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add an entry for `job_id`. Returns `false` if one already exists.
    async fn enqueue(&self, job_id: &JobId, priority_score: u32) -> QueueResult<bool>;

    /// Lease the best visible entry, waiting up to `wait` for one to appear.
    async fn lease(
        &self,
        worker_id: &WorkerId,
        lease_duration: Duration,
        wait: Duration,
    ) -> QueueResult<Option<QueueEntry>>;

    /// Extend a held lease to `lease_duration` from now.
    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        job_id: &JobId,
        lease_duration: Duration,
    ) -> QueueResult<()>;

    /// Remove a held entry; the job needs no further delivery.
    async fn complete(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()>;

    /// Return a held entry to the pending pool immediately.
    async fn release(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()>;

    /// Return a held entry to the pool, visible again after `delay`.
    ///
    /// The entry keeps its enqueue position and delivery count.
    async fn requeue(&self, worker_id: &WorkerId, job_id: &JobId, delay: Duration) -> QueueResult<()>;

    /// Outstanding work by visibility.
    async fn depth(&self) -> QueueResult<QueueDepth>;

    /// Drain entries retired after exceeding the delivery ceiling.
    async fn take_dead_letters(&self) -> QueueResult<Vec<DeadLetter>>;
}
