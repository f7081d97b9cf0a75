//! Pool controller (autoscaler).
//!
//! Every tick samples queue depth and pool state, reaps dead letters, and
//! takes at most one scaling action. Actions are separated by a cooldown and
//! pending termination requests no longer count as capacity, so repeating a
//! tick with unchanged inputs does nothing new.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vscrub_engine::{notify_detached, NotificationSink};
use vscrub_models::{Job, NotificationEvent, QueueDepth, WorkerId};
use vscrub_queue::JobQueue;
use vscrub_store::{update_where, Guarded, JobRecordStore, StoreError};

use crate::config::ControllerConfig;
use crate::error::{WorkerResult, DELIVERY_EXHAUSTED};
use crate::metrics;
use crate::pool::WorkerPool;

/// What one tick decided to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDecision {
    Hold,
    Launch(usize),
    Terminate(Vec<WorkerId>),
}

/// Inputs to a scaling decision.
#[derive(Debug, Clone)]
pub struct PoolSample {
    /// Outstanding work: pending + delayed + leased
    pub depth: u64,
    /// Live workers not already asked to stop
    pub live: usize,
    /// Live workers idle beyond the idle timeout, longest idle first
    pub idle: Vec<WorkerId>,
    pub in_cooldown: bool,
}

/// Decide a scaling action. Pure.
pub fn plan(config: &ControllerConfig, sample: &PoolSample) -> ScalingDecision {
    let floor = config.min_workers.saturating_sub(sample.live);
    let headroom = config.max_workers.saturating_sub(sample.live);

    if sample.in_cooldown {
        return if floor > 0 {
            ScalingDecision::Launch(floor.min(headroom))
        } else {
            ScalingDecision::Hold
        };
    }

    if sample.depth > config.scale_up_threshold && headroom > 0 {
        let excess = sample.depth - config.scale_up_threshold;
        let wanted = excess.div_ceil(config.jobs_per_worker.max(1));
        let wanted = usize::try_from(wanted).unwrap_or(usize::MAX);
        return ScalingDecision::Launch(wanted.max(floor).min(headroom));
    }

    if floor > 0 {
        return ScalingDecision::Launch(floor.min(headroom));
    }

    if sample.depth < config.scale_down_threshold && !sample.idle.is_empty() {
        let removable = sample.live.saturating_sub(config.min_workers);
        let victims: Vec<WorkerId> = sample.idle.iter().take(removable).cloned().collect();
        if !victims.is_empty() {
            return ScalingDecision::Terminate(victims);
        }
    }

    ScalingDecision::Hold
}

/// Summary of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub depth: QueueDepth,
    pub live: usize,
    pub decision: ScalingDecision,
    pub dead_letters: usize,
}

pub struct PoolController {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobRecordStore>,
    pool: Arc<dyn WorkerPool>,
    notifier: Arc<dyn NotificationSink>,
    config: ControllerConfig,
    last_action: Option<Instant>,
}

impl PoolController {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobRecordStore>,
        pool: Arc<dyn WorkerPool>,
        notifier: Arc<dyn NotificationSink>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            pool,
            notifier,
            config,
            last_action: None,
        }
    }

    /// Run ticks until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting pool controller (min {}, max {}, tick {:?})",
            self.config.min_workers, self.config.max_workers, self.config.tick_interval
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping pool controller");
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Pool controller tick failed: {}", e);
                    }
                }
            }
        }
    }

    /// One control step.
    pub async fn tick(&mut self) -> WorkerResult<TickReport> {
        let dead_letters = self.reap_dead_letters().await?;

        let depth = self.queue.depth().await?;
        let workers = self.pool.workers().await;
        let live = workers
            .iter()
            .filter(|w| w.state.is_live() && !w.termination_requested)
            .count();
        let idle = self.pool.idle_workers(self.config.idle_timeout).await;

        metrics::set_queue_depth(&depth);
        metrics::set_pool_size(live);

        let sample = PoolSample {
            depth: depth.total(),
            live,
            idle,
            in_cooldown: self
                .last_action
                .is_some_and(|at| at.elapsed() < self.config.cooldown),
        };
        let decision = plan(&self.config, &sample);
        debug!(depth = sample.depth, live, ?decision, "Pool controller tick");

        match &decision {
            ScalingDecision::Hold => {}
            ScalingDecision::Launch(count) => {
                let launched = self.pool.launch(*count).await?;
                info!(depth = sample.depth, live, "Scaled up by {}", launched.len());
                metrics::record_scale_action("launch", launched.len());
                self.last_action = Some(Instant::now());
            }
            ScalingDecision::Terminate(ids) => {
                let mut requested = 0;
                for id in ids {
                    if self.pool.request_termination(id).await {
                        requested += 1;
                    }
                }
                info!(depth = sample.depth, live, "Requested termination of {} idle workers", requested);
                metrics::record_scale_action("terminate", requested);
                if requested > 0 {
                    self.last_action = Some(Instant::now());
                }
            }
        }

        Ok(TickReport {
            depth,
            live,
            decision,
            dead_letters,
        })
    }

    /// Fail every job whose queue entry ran out of deliveries.
    pub async fn reap_dead_letters(&self) -> WorkerResult<usize> {
        let letters = self.queue.take_dead_letters().await?;
        if letters.is_empty() {
            return Ok(0);
        }
        metrics::record_dead_letters(letters.len());

        for letter in &letters {
            let result = update_where(
                self.store.as_ref(),
                &letter.job_id,
                3,
                |j| !j.is_terminal(),
                |j: &mut Job| j.fail(DELIVERY_EXHAUSTED),
            )
            .await;

            match result {
                Ok(Guarded::Applied(job)) => {
                    warn!(
                        job_id = %job.id,
                        deliveries = letter.delivery_count,
                        "Job failed after exhausting deliveries"
                    );
                    metrics::record_job_failed(job.stage, "delivery_exhausted");
                    notify_detached(
                        &self.notifier,
                        NotificationEvent::failed(job.id.clone(), job.stage, DELIVERY_EXHAUSTED),
                    );
                }
                Ok(Guarded::Skipped(job)) => {
                    debug!(job_id = %job.id, "Dead letter for a job that is already {}", job.status);
                }
                Err(StoreError::NotFound(id)) => {
                    warn!(job_id = %id, "Dead letter for unknown job");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(letters.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<WorkerId> {
        (0..n).map(|i| WorkerId::from_string(format!("worker-{}", i))).collect()
    }

    fn sample(depth: u64, live: usize, idle: usize) -> PoolSample {
        PoolSample {
            depth,
            live,
            idle: ids(idle),
            in_cooldown: false,
        }
    }

    #[test]
    fn test_scale_up_on_backlog() {
        let config = ControllerConfig::default();
        assert_eq!(plan(&config, &sample(15, 2, 0)), ScalingDecision::Launch(5));
    }

    #[test]
    fn test_scale_up_capped_at_max() {
        let config = ControllerConfig::default();
        assert_eq!(plan(&config, &sample(500, 45, 0)), ScalingDecision::Launch(5));
        assert_eq!(plan(&config, &sample(500, 50, 0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_jobs_per_worker_rounds_up() {
        let config = ControllerConfig {
            jobs_per_worker: 4,
            ..ControllerConfig::default()
        };
        assert_eq!(plan(&config, &sample(15, 2, 0)), ScalingDecision::Launch(2));
    }

    #[test]
    fn test_scale_down_idle_only() {
        let config = ControllerConfig::default();
        assert_eq!(
            plan(&config, &sample(3, 4, 1)),
            ScalingDecision::Terminate(ids(1))
        );
    }

    #[test]
    fn test_scale_down_respects_minimum() {
        let config = ControllerConfig {
            min_workers: 2,
            ..ControllerConfig::default()
        };
        assert_eq!(
            plan(&config, &sample(0, 3, 3)),
            ScalingDecision::Terminate(ids(1))
        );
        assert_eq!(plan(&config, &sample(0, 2, 2)), ScalingDecision::Hold);
    }

    #[test]
    fn test_dead_band_holds() {
        let config = ControllerConfig::default();
        assert_eq!(plan(&config, &sample(7, 4, 2)), ScalingDecision::Hold);
    }

    #[test]
    fn test_floor_ignores_cooldown() {
        let config = ControllerConfig::default();
        let mut s = sample(0, 0, 0);
        s.in_cooldown = true;
        assert_eq!(plan(&config, &s), ScalingDecision::Launch(1));

        let mut s = sample(100, 3, 0);
        s.in_cooldown = true;
        assert_eq!(plan(&config, &s), ScalingDecision::Hold);
    }
}
