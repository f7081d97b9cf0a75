//! Job record store: the single source of truth for job stage and status.
//!
//! This crate provides:
//! - The `JobRecordStore` trait with optimistic-concurrency updates
//! - Central validation of stage/status invariants on every mutation
//! - In-memory and Redis implementations
//! - A read-check-write helper for guarded updates

pub mod error;
pub mod memory;
pub mod mutation;
pub mod redis_store;

use async_trait::async_trait;
use vscrub_models::{Job, JobId, JobStatus};

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use mutation::{apply_mutation, update_where, Guarded};
pub use redis_store::RedisJobStore;

/// A mutation applied to a freshly read job record.
pub type JobMutation<'a> = Box<dyn FnOnce(&mut Job) + Send + 'a>;

/// Durable, versioned job state.
///
/// Every mutation is checked against the version the caller read. A mismatch
/// fails with [`StoreError::VersionConflict`] and the caller must re-read.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// Persist a new job. Fails if the id already exists.
    async fn create(&self, job: Job) -> StoreResult<JobId>;

    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Apply `mutation` if the stored version equals `expected_version`.
    ///
    /// Returns the persisted job with its version incremented.
    async fn update(
        &self,
        id: &JobId,
        expected_version: u64,
        mutation: JobMutation<'_>,
    ) -> StoreResult<Job>;

    /// Jobs currently in `status`. Used by monitoring, not the hot path.
    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>>;
}
