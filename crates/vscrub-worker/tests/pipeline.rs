//! State machine tests: one stage attempt per `advance` call.

mod common;

use std::time::Duration;

use common::*;
use vscrub_models::{Job, JobStatus, NotificationKind, Stage, Tier, WorkerId};
use vscrub_store::JobRecordStore;
use vscrub_worker::{AdvanceOutcome, InterruptSignal, CANCELLED};

fn worker() -> WorkerId {
    WorkerId::from_string("worker-test")
}

#[tokio::test]
async fn test_job_runs_every_stage_in_order() {
    let harness = Harness::new(ScriptedSegmentation::new(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;
    let never = InterruptSignal::never();

    let mut seen = Vec::new();
    for expected in [Stage::Extract, Stage::Track, Stage::Process, Stage::Encode] {
        let outcome = machine.advance(&job_id, &worker(), &never).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced { next: expected });
        let job = harness.store.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        seen.push((job.stage, job.progress_percent));
    }
    assert_eq!(
        seen,
        vec![
            (Stage::Extract, 20),
            (Stage::Track, 40),
            (Stage::Process, 60),
            (Stage::Encode, 80)
        ]
    );

    let outcome = machine.advance(&job_id, &worker(), &never).await.unwrap();
    let output_ref = match outcome {
        AdvanceOutcome::Completed { output_ref } => output_ref,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(output_ref, format!("jobs/{}/encode", job_id));

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(job.progress_percent, 100);
    assert!(job.completed_at.is_some());

    let events = harness.events_for(&job_id, 6).await;
    let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.iter().filter(|k| **k == NotificationKind::StageStarted).count(), 5);
    assert!(kinds.contains(&NotificationKind::Complete));

    assert_eq!(
        machine.advance(&job_id, &worker(), &never).await.unwrap(),
        AdvanceOutcome::AlreadyTerminal
    );
}

async fn advance_to_track(harness: &Harness, machine: &vscrub_worker::StateMachine) -> vscrub_models::JobId {
    let job_id = harness.submit(Tier::Standard).await;
    let never = InterruptSignal::never();
    machine.advance(&job_id, &worker(), &never).await.unwrap();
    machine.advance(&job_id, &worker(), &never).await.unwrap();
    assert_eq!(harness.store.get(&job_id).await.unwrap().stage, Stage::Track);
    job_id
}

#[tokio::test]
async fn test_retryable_failure_fails_after_three_attempts() {
    let harness = Harness::new(ScriptedSegmentation::new(Script::Fail(timeout_error))).await;
    let machine = harness.machine();
    let job_id = advance_to_track(&harness, &machine).await;
    let never = InterruptSignal::never();

    assert_eq!(
        machine.advance(&job_id, &worker(), &never).await.unwrap(),
        AdvanceOutcome::RetryScheduled {
            attempt: 1,
            delay: Duration::from_secs(2)
        }
    );
    assert_eq!(
        machine.advance(&job_id, &worker(), &never).await.unwrap(),
        AdvanceOutcome::RetryScheduled {
            attempt: 2,
            delay: Duration::from_secs(4)
        }
    );
    let outcome = machine.advance(&job_id, &worker(), &never).await.unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stage, Stage::Track);
    assert_eq!(job.attempts.get(&Stage::Track), Some(&3));
    assert!(job.error_detail.unwrap().contains("timed out"));
    assert_eq!(harness.segmentation.calls(), 3);
}

#[tokio::test]
async fn test_fatal_engine_error_fails_immediately() {
    let harness = Harness::new(ScriptedSegmentation::new(Script::Fail(invalid_input_error))).await;
    let machine = harness.machine();
    let job_id = advance_to_track(&harness, &machine).await;

    let outcome = machine
        .advance(&job_id, &worker(), &InterruptSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));
    assert_eq!(harness.segmentation.calls(), 1);

    let events = harness.events_for(&job_id, 4).await;
    assert!(events.iter().any(|e| e.kind == NotificationKind::Failed));
}

#[tokio::test]
async fn test_resource_exhaustion_halves_batch_size() {
    let harness =
        Harness::new(ScriptedSegmentation::new(Script::FailTimes(2, exhausted_error))).await;
    let machine = harness.machine();
    let job_id = advance_to_track(&harness, &machine).await;
    let never = InterruptSignal::never();

    for _ in 0..2 {
        let outcome = machine.advance(&job_id, &worker(), &never).await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::RetryScheduled { .. }));
    }
    let outcome = machine.advance(&job_id, &worker(), &never).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Advanced { next: Stage::Process });

    assert_eq!(harness.segmentation.batch_sizes(), vec![16, 8, 4]);
    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.batch_size, 4);
    assert_eq!(job.attempts.get(&Stage::Process), Some(&0));
}

#[tokio::test]
async fn test_validate_failure_is_fatal() {
    let harness = Harness::new(ScriptedSegmentation::new(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;
    harness.blobs_remove_input().await;

    let outcome = machine
        .advance(&job_id, &worker(), &InterruptSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.stage, Stage::Validate);
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_validate_write_failure_is_not_retried() {
    let mut harness = Harness::new(ScriptedSegmentation::new(Script::Succeed)).await;
    harness.reject_blob_writes();
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;

    let outcome = machine
        .advance(&job_id, &worker(), &InterruptSignal::never())
        .await
        .unwrap();
    assert!(matches!(outcome, AdvanceOutcome::Failed { .. }));

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.stage, Stage::Validate);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_attempts(), 0);
    assert!(job.error_detail.unwrap().contains("manifest not written"));
}

#[tokio::test]
async fn test_interrupt_before_attempt_leaves_job_untouched() {
    let harness = Harness::new(ScriptedSegmentation::new(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;

    harness.interrupt.raise();
    let outcome = machine.advance(&job_id, &worker(), &harness.signal).await.unwrap();
    assert_eq!(outcome, AdvanceOutcome::Interrupted { stage: Stage::Validate });

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.version, 0);
}

#[tokio::test]
async fn test_interrupt_during_engine_call_drops_result() {
    let harness = Harness::new(ScriptedSegmentation::gated(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = {
        // Run the first two stages while the gate is irrelevant.
        let job_id = harness.submit(Tier::Standard).await;
        let never = InterruptSignal::never();
        machine.advance(&job_id, &worker(), &never).await.unwrap();
        machine.advance(&job_id, &worker(), &never).await.unwrap();
        job_id
    };
    let before = harness.store.get(&job_id).await.unwrap();

    let task = {
        let machine = machine.clone();
        let job_id = job_id.clone();
        let signal = harness.signal.clone();
        tokio::spawn(async move { machine.advance(&job_id, &worker(), &signal).await })
    };
    harness.segmentation.entered.notified().await;
    harness.interrupt.raise();
    harness.segmentation.gate.notify_one();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, AdvanceOutcome::Interrupted { stage: Stage::Track });

    let after = harness.store.get(&job_id).await.unwrap();
    assert_eq!(after.stage, Stage::Track);
    assert_eq!(after.attempts, before.attempts);
    assert!(!after.outputs.contains_key(&Stage::Track));
}

#[tokio::test]
async fn test_cancel_during_engine_call_discards_result() {
    let harness = Harness::new(ScriptedSegmentation::gated(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;
    let never = InterruptSignal::never();
    machine.advance(&job_id, &worker(), &never).await.unwrap();
    machine.advance(&job_id, &worker(), &never).await.unwrap();

    let task = {
        let machine = machine.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { machine.advance(&job_id, &worker(), &InterruptSignal::never()).await })
    };
    harness.segmentation.entered.notified().await;
    let ack = harness.service().cancel(&job_id).await.unwrap();
    assert!(ack.cancelled);
    harness.segmentation.gate.notify_one();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, AdvanceOutcome::Discarded { terminal: true });

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_detail.as_deref(), Some(CANCELLED));
    assert_eq!(job.stage, Stage::Track);
    assert!(!job.outputs.contains_key(&Stage::Track));
}

#[tokio::test]
async fn test_result_discarded_when_another_writer_advanced_the_stage() {
    let harness = Harness::new(ScriptedSegmentation::gated(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;
    let never = InterruptSignal::never();
    machine.advance(&job_id, &worker(), &never).await.unwrap();
    machine.advance(&job_id, &worker(), &never).await.unwrap();

    let task = {
        let machine = machine.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { machine.advance(&job_id, &worker(), &InterruptSignal::never()).await })
    };
    harness.segmentation.entered.notified().await;

    // A redelivered copy of the attempt finished first.
    let current = harness.store.get(&job_id).await.unwrap();
    harness
        .store
        .update(&job_id, current.version, Box::new(|j: &mut Job| j.advance("jobs/other/track")))
        .await
        .unwrap();
    harness.segmentation.gate.notify_one();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, AdvanceOutcome::Discarded { terminal: false });

    let job = harness.store.get(&job_id).await.unwrap();
    assert_eq!(job.stage, Stage::Process);
    assert_eq!(job.outputs.get(&Stage::Track).map(String::as_str), Some("jobs/other/track"));
}

#[tokio::test]
async fn test_bookkeeping_conflict_is_reapplied() {
    let harness = Harness::new(ScriptedSegmentation::gated(Script::Succeed)).await;
    let machine = harness.machine();
    let job_id = harness.submit(Tier::Standard).await;
    let never = InterruptSignal::never();
    machine.advance(&job_id, &worker(), &never).await.unwrap();
    machine.advance(&job_id, &worker(), &never).await.unwrap();

    let task = {
        let machine = machine.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { machine.advance(&job_id, &worker(), &InterruptSignal::never()).await })
    };
    harness.segmentation.entered.notified().await;

    // A heartbeat stamp bumps the version underneath the attempt.
    let current = harness.store.get(&job_id).await.unwrap();
    harness
        .store
        .update(&job_id, current.version, Box::new(|j: &mut Job| j.record_heartbeat()))
        .await
        .unwrap();
    harness.segmentation.gate.notify_one();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, AdvanceOutcome::Advanced { next: Stage::Process });
}
