//! Backend selection and process wiring shared by the binaries.

use std::sync::Arc;

use tracing::info;
use vscrub_engine::{
    EngineClient, Engines, InMemoryBlobStore, LogNotificationSink, NotificationSink,
    RedisBlobStore, RedisNotificationSink,
};
use vscrub_queue::{InMemoryJobQueue, JobQueue, QueueConfig, RedisJobQueue};
use vscrub_store::{InMemoryJobStore, JobRecordStore, RedisJobStore};

use crate::config::{ControllerConfig, WorkerConfig};
use crate::controller::PoolController;
use crate::error::{WorkerError, WorkerResult};
use crate::interrupt::InterruptSignal;
use crate::pipeline::{PipelineConfig, StateMachine};
use crate::pool::{LocalWorkerPool, WorkerPool};
use crate::registry::WorkerRegistry;
use crate::service::JobService;

/// Where job records and queue entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Single process; state is lost on exit
    Memory,
    Redis,
}

impl StoreBackend {
    /// Read `STORE_BACKEND` (`redis` or `memory`, default `redis`).
    pub fn from_env() -> WorkerResult<Self> {
        match std::env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(WorkerError::config_error(format!(
                "unknown STORE_BACKEND '{}'",
                other
            ))),
        }
    }
}

/// Shared services every component is built from.
#[derive(Clone)]
pub struct Backends {
    pub kind: StoreBackend,
    pub store: Arc<dyn JobRecordStore>,
    pub queue: Arc<dyn JobQueue>,
    pub engines: Engines,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Backends {
    /// Everything in process, with local engines.
    pub fn in_memory() -> Self {
        let queue_config = QueueConfig::from_env();
        Self {
            kind: StoreBackend::Memory,
            store: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(InMemoryJobQueue::new(queue_config.max_deliveries)),
            engines: Engines::local_with_blobs(Arc::new(InMemoryBlobStore::new())),
            notifier: Arc::new(LogNotificationSink),
        }
    }

    /// Redis store, queue, blobs and notifications. Engines are remote when
    /// `ENGINE_SERVICE_URL` is set, local otherwise.
    pub fn redis_from_env() -> WorkerResult<Self> {
        let queue_config = QueueConfig::from_env();
        let blobs = Arc::new(RedisBlobStore::from_env()?);

        let engines = if std::env::var("ENGINE_SERVICE_URL").is_ok() {
            info!("Using remote engine service");
            Engines::remote(Arc::new(EngineClient::from_env()?), blobs)
        } else {
            info!("ENGINE_SERVICE_URL not set, using local engines");
            Engines::local_with_blobs(blobs)
        };

        Ok(Self {
            kind: StoreBackend::Redis,
            store: Arc::new(RedisJobStore::from_env()?),
            notifier: Arc::new(RedisNotificationSink::new(&queue_config.redis_url)?),
            queue: Arc::new(RedisJobQueue::new(queue_config)?),
            engines,
        })
    }

    pub fn from_env() -> WorkerResult<Self> {
        match StoreBackend::from_env()? {
            StoreBackend::Memory => Ok(Self::in_memory()),
            StoreBackend::Redis => Self::redis_from_env(),
        }
    }

    pub fn job_service(&self, worker_config: &WorkerConfig) -> JobService {
        JobService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queue),
            worker_config.default_batch_size,
        )
    }
}

/// A worker pool and the controller that sizes it.
pub struct WorkerRuntime {
    pub pool: Arc<LocalWorkerPool>,
    pub controller: PoolController,
}

impl WorkerRuntime {
    pub fn new(
        backends: &Backends,
        worker_config: WorkerConfig,
        controller_config: ControllerConfig,
        interrupt: InterruptSignal,
    ) -> Self {
        let machine = Arc::new(StateMachine::new(
            Arc::clone(&backends.store),
            backends.engines.clone(),
            Arc::clone(&backends.notifier),
            PipelineConfig::from(&worker_config),
        ));
        let registry = Arc::new(WorkerRegistry::new(controller_config.min_workers));

        let pool = Arc::new(LocalWorkerPool::new(
            Arc::clone(&backends.queue),
            Arc::clone(&backends.store),
            machine,
            registry,
            Arc::clone(&backends.notifier),
            worker_config,
            interrupt,
        ));
        let controller = PoolController::new(
            Arc::clone(&backends.queue),
            Arc::clone(&backends.store),
            Arc::clone(&pool) as Arc<dyn WorkerPool>,
            Arc::clone(&backends.notifier),
            controller_config,
        );

        Self { pool, controller }
    }
}
