//! Worker registry: membership and state of every pool member.
//!
//! The registry is the only place a worker's life can end. Agents ask it for
//! permission to self-terminate; the controller files advisory termination
//! requests that agents pick up once idle.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use vscrub_models::{JobId, WorkerId, WorkerInfo, WorkerState};

struct Member {
    info: WorkerInfo,
    /// When the worker last became idle (registration or end of a job)
    idle_since: Instant,
}

impl Member {
    /// Counts towards the pool size seen by the controller.
    fn is_counted(&self) -> bool {
        self.info.state.is_live() && !self.info.termination_requested
    }
}

pub struct WorkerRegistry {
    members: Mutex<HashMap<WorkerId, Member>>,
    min_workers: usize,
}

impl WorkerRegistry {
    pub fn new(min_workers: usize) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            min_workers,
        }
    }

    pub async fn register(&self, id: WorkerId) {
        let member = Member {
            info: WorkerInfo::new(id.clone()),
            idle_since: Instant::now(),
        };
        self.members.lock().await.insert(id, member);
    }

    pub async fn set_state(&self, id: &WorkerId, state: WorkerState) {
        if let Some(member) = self.members.lock().await.get_mut(id) {
            member.info.state = state;
        }
    }

    /// A lease succeeded; the worker is now processing `job_id`.
    pub async fn mark_leased(&self, id: &WorkerId, job_id: &JobId) {
        if let Some(member) = self.members.lock().await.get_mut(id) {
            member.info.state = WorkerState::Processing;
            member.info.current_job_id = Some(job_id.clone());
            member.info.last_lease_at = Some(Utc::now());
        }
    }

    /// The worker finished its attempt and is idle again.
    pub async fn mark_idle(&self, id: &WorkerId) {
        if let Some(member) = self.members.lock().await.get_mut(id) {
            member.info.state = WorkerState::Idle;
            member.info.current_job_id = None;
            member.idle_since = Instant::now();
        }
    }

    pub async fn record_heartbeat(&self, id: &WorkerId) {
        if let Some(member) = self.members.lock().await.get_mut(id) {
            member.info.last_heartbeat_at = Some(Utc::now());
        }
    }

    pub async fn mark_terminated(&self, id: &WorkerId) {
        if let Some(member) = self.members.lock().await.get_mut(id) {
            member.info.state = WorkerState::Terminated;
            member.info.current_job_id = None;
        }
    }

    /// File an advisory termination request. Returns `false` if the worker
    /// is unknown, already stopping, or already asked.
    pub async fn request_termination(&self, id: &WorkerId) -> bool {
        let mut members = self.members.lock().await;
        match members.get_mut(id) {
            Some(member) if member.is_counted() => {
                member.info.termination_requested = true;
                info!(worker_id = %id, "Termination requested");
                true
            }
            _ => false,
        }
    }

    pub async fn termination_requested(&self, id: &WorkerId) -> bool {
        self.members
            .lock()
            .await
            .get(id)
            .is_some_and(|m| m.info.termination_requested)
    }

    /// Ask to leave the pool after idling out.
    ///
    /// Granted if the controller already asked for this worker, or if the
    /// pool stays at or above `min_workers` without it. A refusal restarts
    /// the worker's idle clock.
    pub async fn try_retire(&self, id: &WorkerId) -> bool {
        let mut members = self.members.lock().await;
        let counted = members.values().filter(|m| m.is_counted()).count();

        let Some(member) = members.get_mut(id) else {
            return true;
        };

        if member.info.termination_requested || counted > self.min_workers {
            member.info.state = WorkerState::Terminated;
            member.info.current_job_id = None;
            info!(worker_id = %id, "Retirement granted");
            true
        } else {
            member.idle_since = Instant::now();
            debug!(worker_id = %id, "Retirement refused, pool at minimum size");
            false
        }
    }

    pub async fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> = self
            .members
            .lock()
            .await
            .values()
            .map(|m| m.info.clone())
            .collect();
        workers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        workers
    }

    /// Counted workers with no job for at least `idle_for`, longest idle first.
    pub async fn idle_workers(&self, idle_for: Duration) -> Vec<WorkerId> {
        let members = self.members.lock().await;
        let mut idle: Vec<(&WorkerId, Instant)> = members
            .iter()
            .filter(|(_, m)| m.is_counted() && m.info.state.is_idle())
            .filter(|(_, m)| m.idle_since.elapsed() >= idle_for)
            .map(|(id, m)| (id, m.idle_since))
            .collect();
        idle.sort_by_key(|(_, since)| *since);
        idle.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Workers the controller should count as pool capacity.
    pub async fn live_count(&self) -> usize {
        self.members
            .lock()
            .await
            .values()
            .filter(|m| m.is_counted())
            .count()
    }

    /// Drop members that have exited.
    pub async fn prune(&self) -> usize {
        let mut members = self.members.lock().await;
        let before = members.len();
        members.retain(|_, m| m.info.state != WorkerState::Terminated);
        before - members.len()
    }
}
