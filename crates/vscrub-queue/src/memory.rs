//! In-memory job queue.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use vscrub_models::{DeadLetter, JobId, QueueDepth, QueueEntry, WorkerId};

use crate::error::{QueueError, QueueResult};
use crate::JobQueue;

#[derive(Debug, Clone)]
struct Lease {
    owner: WorkerId,
    expires_at: Instant,
    expires_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct EntryRecord {
    job_id: JobId,
    priority_score: u32,
    /// Enqueue order; ties on priority go to the lowest sequence
    seq: u64,
    enqueued_at: DateTime<Utc>,
    delivery_count: u32,
    visible_at: Instant,
    lease: Option<Lease>,
}

impl EntryRecord {
    fn to_entry(&self) -> QueueEntry {
        QueueEntry {
            job_id: self.job_id.clone(),
            priority_score: self.priority_score,
            delivery_count: self.delivery_count,
            lease_owner: self.lease.as_ref().map(|l| l.owner.clone()),
            lease_expires_at: self.lease.as_ref().map(|l| l.expires_at_utc),
            enqueued_at: self.enqueued_at,
        }
    }

    fn is_held_by(&self, worker_id: &WorkerId) -> bool {
        self.lease.as_ref().is_some_and(|l| &l.owner == worker_id)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<JobId, EntryRecord>,
    dead_letters: Vec<DeadLetter>,
    next_seq: u64,
}

impl QueueState {
    /// Expire lapsed leases: redeliver, or dead-letter past the ceiling.
    fn sweep(&mut self, now: Instant, max_deliveries: u32) {
        let expired: Vec<JobId> = self
            .entries
            .values()
            .filter(|e| e.lease.as_ref().is_some_and(|l| l.expires_at <= now))
            .map(|e| e.job_id.clone())
            .collect();

        for job_id in expired {
            let Some(entry) = self.entries.get_mut(&job_id) else {
                continue;
            };
            entry.lease = None;
            entry.delivery_count += 1;
            entry.visible_at = now;

            if entry.delivery_count > max_deliveries {
                warn!(
                    job_id = %job_id,
                    deliveries = entry.delivery_count,
                    "Delivery ceiling exceeded, dead-lettering entry"
                );
                let delivery_count = entry.delivery_count;
                self.entries.remove(&job_id);
                self.dead_letters.push(DeadLetter {
                    job_id,
                    delivery_count,
                    dead_lettered_at: Utc::now(),
                });
            } else {
                debug!(job_id = %job_id, deliveries = entry.delivery_count, "Lease expired, entry visible again");
            }
        }
    }

    fn try_lease(&mut self, worker_id: &WorkerId, lease_duration: Duration, now: Instant) -> Option<QueueEntry> {
        let job_id = self
            .entries
            .values()
            .filter(|e| e.lease.is_none() && e.visible_at <= now)
            .max_by_key(|e| (e.priority_score, Reverse(e.seq)))
            .map(|e| e.job_id.clone())?;

        let entry = self.entries.get_mut(&job_id)?;
        entry.lease = Some(Lease {
            owner: worker_id.clone(),
            expires_at: now + lease_duration,
            expires_at_utc: Utc::now()
                + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::zero()),
        });
        Some(entry.to_entry())
    }

    /// Earliest instant at which a `lease` call could succeed or sweep.
    fn next_wakeup(&self) -> Option<Instant> {
        self.entries
            .values()
            .map(|e| match &e.lease {
                Some(lease) => lease.expires_at,
                None => e.visible_at,
            })
            .min()
    }

    fn held_mut(&mut self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<&mut EntryRecord> {
        match self.entries.get_mut(job_id) {
            Some(entry) if entry.is_held_by(worker_id) => Ok(entry),
            _ => Err(QueueError::lease_lost(job_id, worker_id)),
        }
    }
}

/// Process-local queue for tests and single-node deployments.
///
/// Timing uses `tokio::time::Instant`, so tests can drive lease expiry
/// with a paused clock.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_deliveries: u32,
}

impl InMemoryJobQueue {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            max_deliveries,
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: &JobId, priority_score: u32) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(job_id) {
            debug!(job_id = %job_id, "Entry already queued");
            return Ok(false);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(
            job_id.clone(),
            EntryRecord {
                job_id: job_id.clone(),
                priority_score,
                seq,
                enqueued_at: Utc::now(),
                delivery_count: 0,
                visible_at: Instant::now(),
                lease: None,
            },
        );
        drop(state);

        self.notify.notify_waiters();
        Ok(true)
    }

    async fn lease(
        &self,
        worker_id: &WorkerId,
        lease_duration: Duration,
        wait: Duration,
    ) -> QueueResult<Option<QueueEntry>> {
        let deadline = Instant::now() + wait;

        loop {
            // Register before inspecting state so a concurrent enqueue is not missed.
            let notified = self.notify.notified();

            let wakeup = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.sweep(now, self.max_deliveries);
                if let Some(entry) = state.try_lease(worker_id, lease_duration, now) {
                    debug!(job_id = %entry.job_id, worker_id = %worker_id, "Leased entry");
                    return Ok(Some(entry));
                }
                state.next_wakeup()
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }
            let until = wakeup.map_or(deadline, |w| w.min(deadline));

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(until) => {}
            }
        }
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        job_id: &JobId,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep(now, self.max_deliveries);

        let entry = state.held_mut(worker_id, job_id)?;
        if let Some(lease) = entry.lease.as_mut() {
            lease.expires_at = now + lease_duration;
            lease.expires_at_utc = Utc::now()
                + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::zero());
        }
        Ok(())
    }

    async fn complete(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now(), self.max_deliveries);
        state.held_mut(worker_id, job_id)?;
        state.entries.remove(job_id);
        debug!(job_id = %job_id, worker_id = %worker_id, "Completed entry");
        Ok(())
    }

    async fn release(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()> {
        self.requeue(worker_id, job_id, Duration::ZERO).await
    }

    async fn requeue(&self, worker_id: &WorkerId, job_id: &JobId, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep(now, self.max_deliveries);

        let entry = state.held_mut(worker_id, job_id)?;
        entry.lease = None;
        entry.visible_at = now + delay;
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn depth(&self) -> QueueResult<QueueDepth> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep(now, self.max_deliveries);

        let mut depth = QueueDepth::default();
        for entry in state.entries.values() {
            if entry.lease.is_some() {
                depth.leased += 1;
            } else if entry.visible_at <= now {
                depth.pending += 1;
            } else {
                depth.delayed += 1;
            }
        }
        Ok(depth)
    }

    async fn take_dead_letters(&self) -> QueueResult<Vec<DeadLetter>> {
        let mut state = self.state.lock().await;
        state.sweep(Instant::now(), self.max_deliveries);
        Ok(std::mem::take(&mut state.dead_letters))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const LEASE: Duration = Duration::from_secs(120);

    fn worker(name: &str) -> WorkerId {
        WorkerId::from_string(name)
    }

    fn job(name: &str) -> JobId {
        JobId::from_string(name)
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_fifo_ordering() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("standard-1"), 0).await.unwrap();
        queue.enqueue(&job("standard-2"), 0).await.unwrap();
        queue.enqueue(&job("priority-1"), 100).await.unwrap();

        let w = worker("w1");
        let order: Vec<String> = [
            queue.lease(&w, LEASE, Duration::ZERO).await.unwrap(),
            queue.lease(&w, LEASE, Duration::ZERO).await.unwrap(),
            queue.lease(&w, LEASE, Duration::ZERO).await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.unwrap().job_id.0)
        .collect();

        assert_eq!(order, vec!["priority-1", "standard-1", "standard-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_is_idempotent() {
        let queue = InMemoryJobQueue::default();
        assert!(queue.enqueue(&job("a"), 0).await.unwrap());
        assert!(!queue.enqueue(&job("a"), 100).await.unwrap());
        assert_eq!(queue.depth().await.unwrap().total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_lease_is_exclusive() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();

        let first = queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap();
        assert!(first.is_some());
        let second = queue.lease(&worker("w2"), LEASE, Duration::from_secs(5)).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();

        let first = queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.delivery_count, 0);

        tokio::time::advance(Duration::from_secs(121)).await;

        let second = queue.lease(&worker("w2"), LEASE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.job_id, job("a"));
        assert_eq!(second.delivery_count, 1);
        assert_eq!(second.lease_owner, Some(worker("w2")));

        let stale = queue.heartbeat(&worker("w1"), &job("a"), LEASE).await.unwrap_err();
        assert!(stale.is_lease_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_extends_lease() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();
        queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(100)).await;
        queue.heartbeat(&worker("w1"), &job("a"), LEASE).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;

        assert!(queue.lease(&worker("w2"), LEASE, Duration::ZERO).await.unwrap().is_none());
        queue.complete(&worker("w1"), &job("a")).await.unwrap();
        assert_eq!(queue.depth().await.unwrap().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_ceiling_dead_letters() {
        let queue = InMemoryJobQueue::new(2);
        queue.enqueue(&job("poison"), 0).await.unwrap();

        for _ in 0..3 {
            let leased = queue.lease(&worker("w"), LEASE, Duration::ZERO).await.unwrap();
            assert!(leased.is_some());
            tokio::time::advance(Duration::from_secs(121)).await;
        }

        assert!(queue.lease(&worker("w"), LEASE, Duration::ZERO).await.unwrap().is_none());
        let dead = queue.take_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job_id, job("poison"));
        assert_eq!(dead[0].delivery_count, 3);
        assert!(queue.take_dead_letters().await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap().total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_is_immediate_and_uncounted() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();
        queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().unwrap();
        queue.release(&worker("w1"), &job("a")).await.unwrap();

        let again = queue.lease(&worker("w2"), LEASE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.delivery_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_delay_hides_entry() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();
        queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().unwrap();
        queue.requeue(&worker("w1"), &job("a"), Duration::from_secs(4)).await.unwrap();

        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.delayed, 1);
        assert!(queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_keeps_enqueue_position() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("first"), 0).await.unwrap();
        queue.enqueue(&job("second"), 0).await.unwrap();

        let w = worker("w1");
        let leased = queue.lease(&w, LEASE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(leased.job_id, job("first"));
        queue.requeue(&w, &leased.job_id, Duration::ZERO).await.unwrap();

        let next = queue.lease(&w, LEASE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(next.job_id, job("first"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_wait_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryJobQueue::default());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.lease(&worker("w1"), LEASE, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue(&job("late"), 0).await.unwrap();

        let leased = waiter.await.unwrap().unwrap();
        assert_eq!(leased.unwrap().job_id, job("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_require_lease() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(&job("a"), 0).await.unwrap();

        assert!(queue.complete(&worker("w1"), &job("a")).await.unwrap_err().is_lease_lost());
        queue.lease(&worker("w1"), LEASE, Duration::ZERO).await.unwrap();
        assert!(queue.release(&worker("w2"), &job("a")).await.unwrap_err().is_lease_lost());
    }
}
