//! Worker and pool controller configuration.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Worker agent and pipeline configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease length requested from the queue
    pub lease_duration: Duration,
    /// Interval between lease extensions while a stage runs
    pub heartbeat_interval: Duration,
    /// Bounded wait for each lease call
    pub lease_wait: Duration,
    /// Idle time after the last successful lease before self-termination
    pub idle_timeout: Duration,
    /// Attempts per stage before the job fails
    pub max_stage_attempts: u32,
    /// Backoff unit; retry `n` waits `unit * 2^n`
    pub backoff_unit: Duration,
    /// Initial engine batch size for new jobs
    pub default_batch_size: u32,
    /// TTL for stage artifacts in the blob store
    pub artifact_ttl: Duration,
    /// Re-reads allowed when a guarded write hits a version conflict
    pub max_conflict_retries: u32,
    /// Time to wait for agents to drain on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(30),
            lease_wait: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_stage_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            default_batch_size: 16,
            artifact_ttl: Duration::from_secs(86_400),
            max_conflict_retries: 5,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            lease_duration: Duration::from_secs(env_parse("WORKER_LEASE_SECS", 120)),
            heartbeat_interval: Duration::from_secs(env_parse("WORKER_HEARTBEAT_SECS", 30)),
            lease_wait: Duration::from_secs(env_parse("WORKER_LEASE_WAIT_SECS", 5)),
            idle_timeout: Duration::from_secs(env_parse("WORKER_IDLE_TIMEOUT_SECS", 300)),
            max_stage_attempts: env_parse("WORKER_MAX_STAGE_ATTEMPTS", 3),
            backoff_unit: Duration::from_millis(env_parse("WORKER_BACKOFF_UNIT_MS", 1000)),
            default_batch_size: env_parse("WORKER_BATCH_SIZE", 16),
            artifact_ttl: Duration::from_secs(env_parse("WORKER_ARTIFACT_TTL_SECS", 86_400)),
            max_conflict_retries: env_parse("WORKER_MAX_CONFLICT_RETRIES", 5),
            shutdown_timeout: Duration::from_secs(env_parse("WORKER_SHUTDOWN_TIMEOUT", 30)),
        }
    }
}

/// Pool controller (autoscaler) configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between control ticks
    pub tick_interval: Duration,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Scale up while depth exceeds this
    pub scale_up_threshold: u64,
    /// Scale down only while depth is below this
    pub scale_down_threshold: u64,
    /// Outstanding jobs one worker is expected to absorb
    pub jobs_per_worker: u64,
    /// Minimum time between scaling actions
    pub cooldown: Duration,
    /// Idle time before a worker is eligible for scale-down
    pub idle_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            min_workers: 1,
            max_workers: 50,
            scale_up_threshold: 10,
            scale_down_threshold: 5,
            jobs_per_worker: 1,
            cooldown: Duration::from_secs(180),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let min_workers = env_parse("POOL_MIN_WORKERS", 1);
        Self {
            tick_interval: Duration::from_secs(env_parse("POOL_TICK_SECS", 60)),
            min_workers,
            max_workers: env_parse("POOL_MAX_WORKERS", 50).max(min_workers),
            scale_up_threshold: env_parse("POOL_SCALE_UP_THRESHOLD", 10),
            scale_down_threshold: env_parse("POOL_SCALE_DOWN_THRESHOLD", 5),
            jobs_per_worker: env_parse("POOL_JOBS_PER_WORKER", 1).max(1),
            cooldown: Duration::from_secs(env_parse("POOL_COOLDOWN_SECS", 180)),
            idle_timeout: Duration::from_secs(env_parse("WORKER_IDLE_TIMEOUT_SECS", 300)),
        }
    }
}
