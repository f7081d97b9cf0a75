//! Mutation validation and guarded read-check-write updates.

use tracing::debug;
use vscrub_models::{Job, JobId};

use crate::error::{StoreError, StoreResult};
use crate::{JobMutation, JobRecordStore};

/// Apply `mutation` to a copy of `current`, enforcing the record invariants.
///
/// - the caller must have read `expected_version`
/// - terminal records are immutable
/// - `stage` never regresses and `status` only moves forward
/// - the id is immutable and the version is bumped by exactly one
///
/// Shared by every store implementation so the rules live in one place.
pub fn apply_mutation(
    current: &Job,
    expected_version: u64,
    mutation: JobMutation<'_>,
) -> StoreResult<Job> {
    if current.version != expected_version {
        return Err(StoreError::VersionConflict {
            id: current.id.clone(),
            expected: expected_version,
            actual: current.version,
        });
    }
    if current.is_terminal() {
        return Err(StoreError::Terminal(current.id.clone()));
    }

    let mut next = current.clone();
    mutation(&mut next);

    if next.id != current.id {
        return Err(StoreError::invalid_transition(&current.id, "job id is immutable"));
    }
    if next.stage < current.stage {
        return Err(StoreError::invalid_transition(
            &current.id,
            format!("stage regressed from {} to {}", current.stage, next.stage),
        ));
    }
    if !current.status.can_transition_to(next.status) {
        return Err(StoreError::invalid_transition(
            &current.id,
            format!("status {} cannot move to {}", current.status, next.status),
        ));
    }

    next.version = current.version + 1;
    Ok(next)
}

/// Outcome of [`update_where`].
#[derive(Debug, Clone)]
pub enum Guarded {
    /// The guard held and the mutation was persisted.
    Applied(Job),
    /// The guard rejected the current record; nothing was written.
    Skipped(Job),
}

impl Guarded {
    pub fn job(&self) -> &Job {
        match self {
            Guarded::Applied(job) | Guarded::Skipped(job) => job,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Guarded::Applied(_))
    }
}

/// Read-check-write loop: re-read on version conflict and re-apply the
/// mutation as long as `guard` still accepts the fresh record.
///
/// Concurrent writers (heartbeats, stage completion, cancellation) use this
/// so that a conflict caused by an unrelated bookkeeping write is retried,
/// while a conflict caused by a real state change is surfaced as `Skipped`.
pub async fn update_where<S, G, M>(
    store: &S,
    id: &JobId,
    max_attempts: u32,
    guard: G,
    mutation: M,
) -> StoreResult<Guarded>
where
    S: JobRecordStore + ?Sized,
    G: Fn(&Job) -> bool + Send + Sync,
    M: Fn(&mut Job) + Send + Sync,
{
    let mut attempt = 0u32;

    loop {
        let current = store.get(id).await?;
        if !guard(&current) {
            return Ok(Guarded::Skipped(current));
        }

        match store.update(id, current.version, Box::new(|job: &mut Job| mutation(job))).await {
            Ok(job) => return Ok(Guarded::Applied(job)),
            Err(e) if e.is_version_conflict() && attempt + 1 < max_attempts.max(1) => {
                attempt += 1;
                debug!(job_id = %id, attempt, "Version conflict, re-reading job");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vscrub_models::{JobStatus, Mode, SegmentationPoint, Stage, Tier};

    fn job() -> Job {
        Job::new("u", Tier::Standard, Mode::Blur, "in.mp4", SegmentationPoint::new(0, 0.2, 0.2), 8)
    }

    #[test]
    fn test_apply_bumps_version() {
        let current = job();
        let next = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.mark_running())).unwrap();
        assert_eq!(next.version, 1);
        assert_eq!(next.status, JobStatus::Running);
    }

    #[test]
    fn test_apply_rejects_stale_version() {
        let current = job();
        let err = apply_mutation(&current, 3, Box::new(|_: &mut Job| {})).unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[test]
    fn test_apply_rejects_stage_regression() {
        let mut current = job();
        current.stage = Stage::Track;
        let err = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.stage = Stage::Extract)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_apply_rejects_terminal_record() {
        let mut current = job();
        current.fail("cancelled");
        let err = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.record_heartbeat())).unwrap_err();
        assert!(matches!(err, StoreError::Terminal(_)));
    }

    #[test]
    fn test_apply_rejects_status_regression() {
        let mut current = job();
        current.mark_running();
        let err = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.status = JobStatus::Queued)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_apply_rejects_queued_to_complete() {
        let current = job();
        let err = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.status = JobStatus::Complete)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_apply_keeps_version_authoritative() {
        let current = job();
        let next = apply_mutation(&current, 0, Box::new(|j: &mut Job| j.version = 42)).unwrap();
        assert_eq!(next.version, 1);
    }
}
