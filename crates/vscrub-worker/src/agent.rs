//! Worker agent: the loop each pool member runs.
//!
//! Lease, run one stage attempt, hand the entry back, repeat. The agent holds
//! no job state of its own; everything it needs is in the record store and
//! the queue entry, so losing an agent at any point only costs a lease expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vscrub_engine::{notify_detached, NotificationSink};
use vscrub_models::{Job, JobId, NotificationEvent, QueueEntry, WorkerId, WorkerState};
use vscrub_queue::{JobQueue, QueueError, QueueResult};
use vscrub_store::{update_where, JobRecordStore};

use crate::config::WorkerConfig;
use crate::interrupt::InterruptSignal;
use crate::pipeline::{AdvanceOutcome, StateMachine};
use crate::registry::WorkerRegistry;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Why an agent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// Pre-emption notice; any held work was released.
    Interrupted,
    /// Idled out and the registry granted retirement.
    Retired,
    /// The controller asked this worker to stop.
    TerminationRequested,
}

pub struct WorkerAgent {
    id: WorkerId,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn JobRecordStore>,
    machine: Arc<StateMachine>,
    registry: Arc<WorkerRegistry>,
    notifier: Arc<dyn NotificationSink>,
    config: WorkerConfig,
    interrupt: InterruptSignal,
}

impl WorkerAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: WorkerId,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn JobRecordStore>,
        machine: Arc<StateMachine>,
        registry: Arc<WorkerRegistry>,
        notifier: Arc<dyn NotificationSink>,
        config: WorkerConfig,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            machine,
            registry,
            notifier,
            config,
            interrupt,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Run until interrupted, retired or asked to stop.
    ///
    /// The agent must already be registered.
    pub async fn run(mut self) -> AgentExit {
        info!(worker_id = %self.id, "Worker agent started");
        let mut last_lease = Instant::now();

        let exit = loop {
            if self.interrupt.is_raised() {
                break AgentExit::Interrupted;
            }
            if self.registry.termination_requested(&self.id).await {
                break AgentExit::TerminationRequested;
            }

            self.registry.set_state(&self.id, WorkerState::Leasing).await;
            let lease = self
                .queue
                .lease(&self.id, self.config.lease_duration, self.config.lease_wait);
            tokio::pin!(lease);
            let raced = tokio::select! {
                biased;
                _ = self.interrupt.raised() => None,
                leased = &mut lease => Some(leased),
            };
            let leased = match raced {
                Some(leased) => leased,
                None => {
                    // A lease may commit before its reply arrives, so let it
                    // finish and hand back whatever it took.
                    if let Ok(Some(entry)) = lease.await {
                        self.settle(&entry.job_id, "release", || {
                            self.queue.release(&self.id, &entry.job_id)
                        })
                        .await;
                    }
                    break AgentExit::Interrupted;
                }
            };

            match leased {
                Ok(Some(entry)) => {
                    last_lease = Instant::now();
                    self.registry.mark_leased(&self.id, &entry.job_id).await;
                    if self.process(entry).await {
                        break AgentExit::Interrupted;
                    }
                    self.registry.mark_idle(&self.id).await;
                }
                Ok(None) => {
                    self.registry.set_state(&self.id, WorkerState::Idle).await;
                    if last_lease.elapsed() >= self.config.idle_timeout {
                        if self.registry.try_retire(&self.id).await {
                            break AgentExit::Retired;
                        }
                        last_lease = Instant::now();
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, "Lease failed: {}", e);
                    self.registry.set_state(&self.id, WorkerState::Idle).await;
                    tokio::time::sleep(self.config.lease_wait).await;
                }
            }
        };

        self.registry.mark_terminated(&self.id).await;
        info!(worker_id = %self.id, reason = ?exit, "Worker agent stopped");
        exit
    }

    /// Run one stage attempt for a leased entry and hand the entry back.
    ///
    /// Returns `true` if the attempt was interrupted.
    async fn process(&self, entry: QueueEntry) -> bool {
        let job_id = entry.job_id;
        debug!(
            worker_id = %self.id,
            job_id = %job_id,
            delivery_count = entry.delivery_count,
            "Processing leased entry"
        );

        let heartbeat = HeartbeatGuard(self.spawn_heartbeat(job_id.clone()));
        let outcome = self.machine.advance(&job_id, &self.id, &self.interrupt).await;
        drop(heartbeat);

        match outcome {
            Ok(AdvanceOutcome::Interrupted { stage }) => {
                self.registry.set_state(&self.id, WorkerState::Draining).await;
                self.settle(&job_id, "release", || self.queue.release(&self.id, &job_id))
                    .await;
                notify_detached(&self.notifier, NotificationEvent::requeued(job_id.clone(), stage));
                return true;
            }
            Ok(outcome) if outcome.is_terminal() => {
                self.settle(&job_id, "complete", || self.queue.complete(&self.id, &job_id))
                    .await;
            }
            Ok(AdvanceOutcome::RetryScheduled { delay, .. }) => {
                self.requeue(&job_id, delay).await;
            }
            Ok(_) => {
                self.requeue(&job_id, Duration::ZERO).await;
            }
            Err(e) if e.is_not_found() => {
                warn!(worker_id = %self.id, job_id = %job_id, "Queued job has no record, dropping entry");
                self.settle(&job_id, "complete", || self.queue.complete(&self.id, &job_id))
                    .await;
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %job_id, "Stage attempt aborted: {}", e);
                self.requeue(&job_id, self.config.backoff_unit).await;
            }
        }
        false
    }

    async fn requeue(&self, job_id: &JobId, delay: Duration) {
        self.settle(job_id, "requeue", || self.queue.requeue(&self.id, job_id, delay))
            .await;
    }

    /// Hand the entry back, retrying transient queue errors.
    async fn settle<F, Fut>(&self, job_id: &JobId, op: &str, operation: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = QueueResult<()>>,
    {
        let config = RetryConfig::new(format!("queue_{}", op));
        match retry_async(&config, |e: &QueueError| !e.is_lease_lost(), operation).await {
            Ok(()) => debug!(worker_id = %self.id, job_id = %job_id, op, "Queue entry settled"),
            Err(e) if e.is_lease_lost() => {
                info!(worker_id = %self.id, job_id = %job_id, "Lease lost before {}, another worker owns the job", op)
            }
            Err(e) => error!(worker_id = %self.id, job_id = %job_id, "Failed to {} queue entry: {}", op, e),
        }
    }

    /// Extend the lease and stamp the record while an attempt runs.
    fn spawn_heartbeat(&self, job_id: JobId) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let store = Arc::clone(&self.store);
        let registry = Arc::clone(&self.registry);
        let worker_id = self.id.clone();
        let interval = self.config.heartbeat_interval;
        let lease_duration = self.config.lease_duration;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            let mut failures = FailureTracker::new(3);

            loop {
                ticker.tick().await;

                match queue.heartbeat(&worker_id, &job_id, lease_duration).await {
                    Ok(()) => failures.record_success(),
                    Err(e) if e.is_lease_lost() => {
                        warn!(worker_id = %worker_id, job_id = %job_id, "Lease lost during heartbeat");
                        break;
                    }
                    Err(e) => {
                        if failures.record_failure() {
                            warn!(worker_id = %worker_id, job_id = %job_id, "Heartbeat failed: {}", e);
                        }
                        continue;
                    }
                }

                registry.record_heartbeat(&worker_id).await;
                let stamped = update_where(
                    store.as_ref(),
                    &job_id,
                    3,
                    |j| !j.is_terminal(),
                    |j: &mut Job| j.record_heartbeat(),
                )
                .await;
                if let Err(e) = stamped {
                    debug!(job_id = %job_id, "Failed to stamp heartbeat on job record: {}", e);
                }
            }
        })
    }
}

/// Stops the heartbeat task when the attempt ends or the agent is dropped.
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
