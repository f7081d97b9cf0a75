//! Redis-backed job record store.
//!
//! Each job is a JSON document under `{prefix}:job:{id}`; a set per status
//! (`{prefix}:jobs:{status}`) indexes records for `list_by_status`. Updates
//! are compare-and-set: a Lua script swaps the document only if it still
//! holds the exact payload the writer read.

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, info};
use vscrub_models::{Job, JobId, JobStatus};

use crate::error::{StoreError, StoreResult};
use crate::mutation::apply_mutation;
use crate::{JobMutation, JobRecordStore};

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if KEYS[2] ~= KEYS[3] then
  redis.call('SREM', KEYS[2], ARGV[3])
  redis.call('SADD', KEYS[3], ARGV[3])
end
return 1
"#;

/// Job store backed by Redis documents and status index sets.
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
    cas: redis::Script,
}

impl RedisJobStore {
    /// Create a new store.
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            cas: redis::Script::new(CAS_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "vscrub".to_string());
        info!("Using Redis job store with prefix '{}'", prefix);
        Self::new(&redis_url, prefix)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn status_key(&self, status: JobStatus) -> String {
        format!("{}:jobs:{}", self.prefix, status.as_str())
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))
    }

    async fn read_raw(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &JobId,
    ) -> StoreResult<String> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        raw.ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

#[async_trait]
impl JobRecordStore for RedisJobStore {
    async fn create(&self, job: Job) -> StoreResult<JobId> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&job)?;

        let created: bool = conn.set_nx(self.job_key(&job.id), &payload).await?;
        if !created {
            return Err(StoreError::AlreadyExists(job.id));
        }
        conn.sadd::<_, _, ()>(self.status_key(job.status), job.id.as_str())
            .await?;

        debug!(job_id = %job.id, "Created job record");
        Ok(job.id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.connection().await?;
        let raw = self.read_raw(&mut conn, id).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn update(
        &self,
        id: &JobId,
        expected_version: u64,
        mutation: JobMutation<'_>,
    ) -> StoreResult<Job> {
        let mut conn = self.connection().await?;
        let raw = self.read_raw(&mut conn, id).await?;
        let current: Job = serde_json::from_str(&raw)?;
        let next = apply_mutation(&current, expected_version, mutation)?;
        let payload = serde_json::to_string(&next)?;

        let swapped: i32 = self
            .cas
            .key(self.job_key(id))
            .key(self.status_key(current.status))
            .key(self.status_key(next.status))
            .arg(&raw)
            .arg(&payload)
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        if swapped == 1 {
            return Ok(next);
        }

        // Lost the race between read and swap; report what is stored now.
        let latest = self.read_raw(&mut conn, id).await?;
        let actual = serde_json::from_str::<Job>(&latest)?.version;
        Err(StoreError::VersionConflict {
            id: id.clone(),
            expected: expected_version,
            actual,
        })
    }

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.status_key(status)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.job_key(&JobId::from_string(id.as_str())))
            .collect();
        let raws: Vec<Option<String>> = conn.mget(keys).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            let job: Job = serde_json::from_str(&raw)?;
            // The index is updated with the document, but skip stragglers.
            if job.status == status {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
