//! Application state.

use std::sync::Arc;

use vscrub_queue::JobQueue;
use vscrub_worker::{Backends, JobService, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<JobService>,
    pub queue: Arc<dyn JobQueue>,
}

impl AppState {
    /// Create state over already-built backends.
    pub fn new(config: ApiConfig, backends: &Backends, worker_config: &WorkerConfig) -> Self {
        Self {
            config,
            jobs: Arc::new(backends.job_service(worker_config)),
            queue: Arc::clone(&backends.queue),
        }
    }
}
