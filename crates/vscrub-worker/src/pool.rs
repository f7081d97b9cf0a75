//! Worker pools the controller can resize.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};
use vscrub_engine::NotificationSink;
use vscrub_models::{WorkerId, WorkerInfo};
use vscrub_queue::JobQueue;
use vscrub_store::JobRecordStore;

use crate::agent::{AgentExit, WorkerAgent};
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::interrupt::InterruptSignal;
use crate::pipeline::StateMachine;
use crate::registry::WorkerRegistry;

/// Operations the pool controller needs from a fleet.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Current members, including ones asked to stop.
    async fn workers(&self) -> Vec<WorkerInfo>;

    /// Counted members with no job for at least `idle_for`.
    async fn idle_workers(&self, idle_for: Duration) -> Vec<WorkerId>;

    /// Start `count` new workers.
    async fn launch(&self, count: usize) -> WorkerResult<Vec<WorkerId>>;

    /// Ask a worker to stop once idle. Returns `false` if it was not eligible.
    async fn request_termination(&self, id: &WorkerId) -> bool;
}

/// Pool of agents running as tasks in this process.
pub struct LocalWorkerPool {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobRecordStore>,
    machine: Arc<StateMachine>,
    registry: Arc<WorkerRegistry>,
    notifier: Arc<dyn NotificationSink>,
    config: WorkerConfig,
    interrupt: InterruptSignal,
    tasks: Mutex<JoinSet<AgentExit>>,
}

impl LocalWorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobRecordStore>,
        machine: Arc<StateMachine>,
        registry: Arc<WorkerRegistry>,
        notifier: Arc<dyn NotificationSink>,
        config: WorkerConfig,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            queue,
            store,
            machine,
            registry,
            notifier,
            config,
            interrupt,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Reap finished agent tasks and drop their registry entries.
    pub async fn reap(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut reaped = 0;
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("Worker agent task failed: {}", e);
            }
            reaped += 1;
        }
        drop(tasks);
        self.registry.prune().await;
        reaped
    }

    /// Wait for every agent to exit, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        let mut tasks = self.tasks.lock().await;
        let waited = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Worker agent task failed: {}", e);
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!("Timed out waiting for {} worker agents, aborting", tasks.len());
            tasks.abort_all();
        }
    }
}

#[async_trait]
impl WorkerPool for LocalWorkerPool {
    async fn workers(&self) -> Vec<WorkerInfo> {
        self.registry.snapshot().await
    }

    async fn idle_workers(&self, idle_for: Duration) -> Vec<WorkerId> {
        self.registry.idle_workers(idle_for).await
    }

    async fn launch(&self, count: usize) -> WorkerResult<Vec<WorkerId>> {
        self.reap().await;

        let mut tasks = self.tasks.lock().await;
        let mut launched = Vec::with_capacity(count);
        for _ in 0..count {
            let id = WorkerId::new();
            self.registry.register(id.clone()).await;

            let agent = WorkerAgent::new(
                id.clone(),
                Arc::clone(&self.queue),
                Arc::clone(&self.store),
                Arc::clone(&self.machine),
                Arc::clone(&self.registry),
                Arc::clone(&self.notifier),
                self.config.clone(),
                self.interrupt.clone(),
            );
            tasks.spawn(agent.run());
            launched.push(id);
        }

        info!("Launched {} worker agents", launched.len());
        Ok(launched)
    }

    async fn request_termination(&self, id: &WorkerId) -> bool {
        self.registry.request_termination(id).await
    }
}
