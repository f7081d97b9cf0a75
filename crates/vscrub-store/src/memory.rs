//! In-memory job record store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use vscrub_models::{Job, JobId, JobStatus};

use crate::error::{StoreError, StoreResult};
use crate::mutation::apply_mutation;
use crate::{JobMutation, JobRecordStore};

/// Process-local store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRecordStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> StoreResult<JobId> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        debug!(job_id = %id, "Created job record");
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        id: &JobId,
        expected_version: u64,
        mutation: JobMutation<'_>,
    ) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let next = apply_mutation(current, expected_version, mutation)?;
        jobs.insert(id.clone(), next.clone());
        Ok(next)
    }

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
