//! Job queue using Redis sorted sets.
//!
//! Layout under `{prefix}:queue:`:
//! - `pending` zset, score = rank (priority band, then enqueue time)
//! - `delayed` zset, score = visible-at millis
//! - `leased` zset, score = lease expiry millis
//! - `dead` list of `job_id|deliveries|millis`
//! - `entry:{job_id}` hash with priority, rank, enqueued_at, deliveries, owner
//!
//! All state transitions run as Lua scripts timed by the Redis server clock,
//! so workers with skewed clocks agree on lease expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use vscrub_models::{DeadLetter, JobId, QueueDepth, QueueEntry, WorkerId};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::JobQueue;

/// Highest priority score that still gets its own rank band.
const MAX_PRIORITY_SCORE: u64 = 100;
/// Width of one priority band in the pending rank (ms timestamps fit below it).
const PRIORITY_BAND: u64 = 10_000_000_000_000;

const NOW_MS: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
"#;

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
  return 0
end
redis.call('HSET', KEYS[2], 'priority', ARGV[2], 'rank', ARGV[3], 'enqueued_at', ARGV[4], 'deliveries', 0)
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
"#;

// KEYS: pending, delayed, leased, dead
// ARGV: entry key prefix, worker id ('' = sweep only), lease ms, max deliveries
const LEASE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(expired) do
  local ekey = ARGV[1] .. id
  redis.call('ZREM', KEYS[3], id)
  local deliveries = redis.call('HINCRBY', ekey, 'deliveries', 1)
  redis.call('HDEL', ekey, 'owner', 'expires_at')
  if deliveries > tonumber(ARGV[4]) then
    redis.call('RPUSH', KEYS[4], id .. '|' .. deliveries .. '|' .. string.format('%.0f', now))
    redis.call('DEL', ekey)
  else
    redis.call('ZADD', KEYS[1], redis.call('HGET', ekey, 'rank'), id)
  end
end
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('ZADD', KEYS[1], redis.call('HGET', ARGV[1] .. id, 'rank'), id)
end
if ARGV[2] == '' then
  return nil
end
local head = redis.call('ZRANGE', KEYS[1], 0, 0)
if #head == 0 then
  return nil
end
local id = head[1]
local ekey = ARGV[1] .. id
local expires = string.format('%.0f', now + tonumber(ARGV[3]))
redis.call('ZREM', KEYS[1], id)
redis.call('ZADD', KEYS[3], expires, id)
redis.call('HSET', ekey, 'owner', ARGV[2], 'expires_at', expires)
local e = redis.call('HMGET', ekey, 'priority', 'deliveries', 'enqueued_at')
return {id, e[1], e[2], e[3], expires}
"#;

// KEYS: pending, delayed, leased
// ARGV: entry key prefix, job id, worker id, op, ms argument
const HELD_SCRIPT: &str = r#"
local ekey = ARGV[1] .. ARGV[2]
if redis.call('HGET', ekey, 'owner') ~= ARGV[3] then
  return 0
end
local exp = redis.call('ZSCORE', KEYS[3], ARGV[2])
if not exp or tonumber(exp) <= now then
  return 0
end
local op = ARGV[4]
if op == 'heartbeat' then
  local expires = string.format('%.0f', now + tonumber(ARGV[5]))
  redis.call('ZADD', KEYS[3], expires, ARGV[2])
  redis.call('HSET', ekey, 'expires_at', expires)
elseif op == 'complete' then
  redis.call('ZREM', KEYS[3], ARGV[2])
  redis.call('DEL', ekey)
else
  redis.call('ZREM', KEYS[3], ARGV[2])
  redis.call('HDEL', ekey, 'owner', 'expires_at')
  if tonumber(ARGV[5]) > 0 then
    redis.call('ZADD', KEYS[2], string.format('%.0f', now + tonumber(ARGV[5])), ARGV[2])
  else
    redis.call('ZADD', KEYS[1], redis.call('HGET', ekey, 'rank'), ARGV[2])
  end
end
return 1
"#;

/// Pending rank: lower is leased first.
fn pending_rank(priority_score: u32, enqueued_ms: i64) -> u64 {
    let band = MAX_PRIORITY_SCORE - u64::from(priority_score).min(MAX_PRIORITY_SCORE);
    band * PRIORITY_BAND + enqueued_ms.max(0) as u64
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn parse_field<T: std::str::FromStr>(value: Option<&String>, field: &str) -> QueueResult<T> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| QueueError::Malformed(format!("missing or invalid {}", field)))
}

fn parse_dead_letter(raw: &str) -> QueueResult<DeadLetter> {
    let mut parts = raw.rsplitn(3, '|');
    let ms: i64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| QueueError::Malformed(raw.to_string()))?;
    let delivery_count: u32 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| QueueError::Malformed(raw.to_string()))?;
    let job_id = parts
        .next()
        .ok_or_else(|| QueueError::Malformed(raw.to_string()))?;
    Ok(DeadLetter {
        job_id: JobId::from_string(job_id),
        delivery_count,
        dead_lettered_at: millis_to_utc(ms),
    })
}

/// Job queue client backed by Redis.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
    enqueue_script: redis::Script,
    lease_script: redis::Script,
    held_script: redis::Script,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        info!(
            "Using Redis job queue with prefix '{}' (max deliveries {})",
            config.key_prefix, config.max_deliveries
        );
        Ok(Self {
            client,
            config,
            enqueue_script: redis::Script::new(ENQUEUE_SCRIPT),
            lease_script: redis::Script::new(&format!("{}{}", NOW_MS, LEASE_SCRIPT)),
            held_script: redis::Script::new(&format!("{}{}", NOW_MS, HELD_SCRIPT)),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    fn key(&self, name: &str) -> String {
        format!("{}:queue:{}", self.config.key_prefix, name)
    }

    fn entry_prefix(&self) -> String {
        self.key("entry:")
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Run the lease script once. An empty `worker` only sweeps.
    async fn lease_once(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        worker: &str,
        lease_duration: Duration,
    ) -> QueueResult<Option<Vec<String>>> {
        let reply: Option<Vec<String>> = self
            .lease_script
            .key(self.key("pending"))
            .key(self.key("delayed"))
            .key(self.key("leased"))
            .key(self.key("dead"))
            .arg(self.entry_prefix())
            .arg(worker)
            .arg(lease_duration.as_millis() as u64)
            .arg(self.config.max_deliveries)
            .invoke_async(conn)
            .await?;
        Ok(reply)
    }

    async fn held_op(
        &self,
        worker_id: &WorkerId,
        job_id: &JobId,
        op: &str,
        millis: u64,
    ) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let applied: i32 = self
            .held_script
            .key(self.key("pending"))
            .key(self.key("delayed"))
            .key(self.key("leased"))
            .arg(self.entry_prefix())
            .arg(job_id.as_str())
            .arg(worker_id.as_str())
            .arg(op)
            .arg(millis)
            .invoke_async(&mut conn)
            .await?;

        if applied == 1 {
            debug!(job_id = %job_id, worker_id = %worker_id, op, "Queue entry updated");
            Ok(())
        } else {
            Err(QueueError::lease_lost(job_id, worker_id))
        }
    }

    fn entry_from_reply(worker_id: &WorkerId, reply: Vec<String>) -> QueueResult<QueueEntry> {
        let job_id = reply
            .first()
            .ok_or_else(|| QueueError::Malformed("empty lease reply".to_string()))?;
        Ok(QueueEntry {
            job_id: JobId::from_string(job_id.as_str()),
            priority_score: parse_field(reply.get(1), "priority")?,
            delivery_count: parse_field(reply.get(2), "deliveries")?,
            lease_owner: Some(worker_id.clone()),
            lease_expires_at: Some(millis_to_utc(parse_field(reply.get(4), "expires_at")?)),
            enqueued_at: millis_to_utc(parse_field(reply.get(3), "enqueued_at")?),
        })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job_id: &JobId, priority_score: u32) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let enqueued_ms = Utc::now().timestamp_millis();

        let added: i32 = self
            .enqueue_script
            .key(self.key("pending"))
            .key(format!("{}{}", self.entry_prefix(), job_id))
            .arg(job_id.as_str())
            .arg(priority_score)
            .arg(pending_rank(priority_score, enqueued_ms))
            .arg(enqueued_ms)
            .invoke_async(&mut conn)
            .await?;

        if added == 1 {
            info!(job_id = %job_id, priority_score, "Enqueued job");
        } else {
            debug!(job_id = %job_id, "Entry already queued");
        }
        Ok(added == 1)
    }

    async fn lease(
        &self,
        worker_id: &WorkerId,
        lease_duration: Duration,
        wait: Duration,
    ) -> QueueResult<Option<QueueEntry>> {
        let mut conn = self.connection().await?;
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            if let Some(reply) = self.lease_once(&mut conn, worker_id.as_str(), lease_duration).await? {
                let entry = Self::entry_from_reply(worker_id, reply)?;
                debug!(job_id = %entry.job_id, worker_id = %worker_id, "Leased entry");
                return Ok(Some(entry));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep((deadline - now).min(self.config.poll_interval)).await;
        }
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        job_id: &JobId,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        self.held_op(worker_id, job_id, "heartbeat", lease_duration.as_millis() as u64)
            .await
    }

    async fn complete(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()> {
        self.held_op(worker_id, job_id, "complete", 0).await
    }

    async fn release(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()> {
        self.held_op(worker_id, job_id, "requeue", 0).await
    }

    async fn requeue(&self, worker_id: &WorkerId, job_id: &JobId, delay: Duration) -> QueueResult<()> {
        self.held_op(worker_id, job_id, "requeue", delay.as_millis() as u64)
            .await
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut conn = self.connection().await?;
        self.lease_once(&mut conn, "", Duration::ZERO).await?;

        let (pending, delayed, leased): (u64, u64, u64) = redis::pipe()
            .zcard(self.key("pending"))
            .zcard(self.key("delayed"))
            .zcard(self.key("leased"))
            .query_async(&mut conn)
            .await?;

        Ok(QueueDepth {
            pending,
            delayed,
            leased,
        })
    }

    async fn take_dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let mut conn = self.connection().await?;
        self.lease_once(&mut conn, "", Duration::ZERO).await?;

        let dead_key = self.key("dead");
        let (raw, _): (Vec<String>, i64) = redis::pipe()
            .atomic()
            .lrange(&dead_key, 0, -1)
            .del(&dead_key)
            .query_async(&mut conn)
            .await?;

        let mut letters = Vec::with_capacity(raw.len());
        for item in raw {
            match parse_dead_letter(&item) {
                Ok(letter) => letters.push(letter),
                Err(e) => warn!("Skipping malformed dead letter '{}': {}", item, e),
            }
        }
        Ok(letters)
    }
}
