//! Pipeline state machine.
//!
//! One `advance` call executes exactly one attempt of the job's current
//! stage and persists the result with a guarded, version-checked write.
//! Interruption and cancellation are observed at two checkpoints: before the
//! engine call and after it, before anything is persisted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, Instrument};
use vscrub_engine::{notify_detached, Engines, NotificationSink};
use vscrub_models::{Job, JobId, JobStatus, NotificationEvent, Stage, WorkerId};
use vscrub_store::{update_where, Guarded, JobRecordStore};

use crate::config::WorkerConfig;
use crate::error::{StageError, WorkerResult};
use crate::interrupt::InterruptSignal;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::backoff_delay;
use crate::stages::run_stage;

/// Result of one stage attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Stage succeeded; the job now sits at `next`.
    Advanced { next: Stage },
    /// Encode succeeded; the job is Complete.
    Completed { output_ref: String },
    /// Retryable failure recorded; run the stage again after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// The job is now Failed.
    Failed { reason: String },
    /// Interrupted at a checkpoint; nothing was persisted.
    Interrupted { stage: Stage },
    /// The record changed underneath the attempt (cancelled, or advanced by
    /// another worker) and the result was dropped.
    Discarded { terminal: bool },
    /// The job was already Complete or Failed when the attempt began.
    AlreadyTerminal,
}

impl AdvanceOutcome {
    /// The job needs no further delivery.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdvanceOutcome::Completed { .. }
                | AdvanceOutcome::Failed { .. }
                | AdvanceOutcome::AlreadyTerminal
                | AdvanceOutcome::Discarded { terminal: true }
        )
    }
}

/// Knobs for the state machine, taken from `WorkerConfig`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_stage_attempts: u32,
    pub backoff_unit: Duration,
    pub artifact_ttl: Duration,
    pub max_conflict_retries: u32,
}

impl From<&WorkerConfig> for PipelineConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_stage_attempts: config.max_stage_attempts.max(1),
            backoff_unit: config.backoff_unit,
            artifact_ttl: config.artifact_ttl,
            max_conflict_retries: config.max_conflict_retries,
        }
    }
}

/// Drives jobs through Validate, Extract, Track, Process and Encode.
pub struct StateMachine {
    store: Arc<dyn JobRecordStore>,
    engines: Engines,
    notifier: Arc<dyn NotificationSink>,
    config: PipelineConfig,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn JobRecordStore>,
        engines: Engines,
        notifier: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            engines,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one attempt of `job_id`'s current stage.
    ///
    /// Errors are infrastructure failures reading or writing the record; the
    /// job itself is untouched in that case.
    pub async fn advance(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        interrupt: &InterruptSignal,
    ) -> WorkerResult<AdvanceOutcome> {
        let job = self.store.get(job_id).await?;
        if job.is_terminal() {
            return Ok(AdvanceOutcome::AlreadyTerminal);
        }

        let logger = JobLogger::new(job_id, job.stage, worker_id);
        let span = logger.create_span();
        self.attempt(job, &logger, interrupt).instrument(span).await
    }

    async fn attempt(
        &self,
        job: Job,
        logger: &JobLogger,
        interrupt: &InterruptSignal,
    ) -> WorkerResult<AdvanceOutcome> {
        let stage = job.stage;

        if interrupt.is_raised() {
            return Ok(AdvanceOutcome::Interrupted { stage });
        }

        let job = if job.status == JobStatus::Queued {
            match self.guarded(&job.id, stage, |j: &mut Job| j.mark_running()).await? {
                Guarded::Applied(job) => job,
                Guarded::Skipped(current) => return Ok(discarded(logger, &current)),
            }
        } else {
            job
        };

        let attempt = job.current_attempts();
        logger.log_start(attempt);
        notify_detached(
            &self.notifier,
            NotificationEvent::stage_started(job.id.clone(), stage, attempt),
        );

        let result = run_stage(&job, &self.engines, self.config.artifact_ttl).await;

        if interrupt.is_raised() {
            debug!(job_id = %job.id, "Interrupted after engine call, dropping result");
            return Ok(AdvanceOutcome::Interrupted { stage });
        }

        match result {
            Ok(output_ref) => self.persist_success(&job, logger, output_ref).await,
            Err(e) => self.persist_failure(&job, logger, e).await,
        }
    }

    async fn persist_success(
        &self,
        job: &Job,
        logger: &JobLogger,
        output_ref: String,
    ) -> WorkerResult<AdvanceOutcome> {
        let stage = job.stage;
        let persisted = self
            .guarded(&job.id, stage, |j: &mut Job| j.advance(output_ref.clone()))
            .await?;
        let job = match persisted {
            Guarded::Applied(job) => job,
            Guarded::Skipped(current) => return Ok(discarded(logger, &current)),
        };

        metrics::record_stage_attempt(stage, "success");
        if job.status == JobStatus::Complete {
            logger.log_completion(&output_ref);
            metrics::record_job_completed();
            notify_detached(&self.notifier, NotificationEvent::complete(job.id.clone(), &output_ref));
            Ok(AdvanceOutcome::Completed { output_ref })
        } else {
            logger.log_advanced(job.stage);
            Ok(AdvanceOutcome::Advanced { next: job.stage })
        }
    }

    async fn persist_failure(
        &self,
        job: &Job,
        logger: &JobLogger,
        error: StageError,
    ) -> WorkerResult<AdvanceOutcome> {
        let stage = job.stage;
        let reason = error.to_string();
        // Validate never retries, whatever the error source.
        let fatal = error.is_fatal() || stage == Stage::Validate;
        let halve = error.is_resource_exhausted();
        let max_attempts = self.config.max_stage_attempts;

        let persisted = self
            .guarded(&job.id, stage, |j: &mut Job| {
                if fatal {
                    j.fail(reason.clone());
                    return;
                }
                let attempts = j.record_attempt_failure();
                if halve {
                    j.halve_batch_size();
                }
                if attempts >= max_attempts {
                    j.fail(reason.clone());
                }
            })
            .await?;
        let job = match persisted {
            Guarded::Applied(job) => job,
            Guarded::Skipped(current) => return Ok(discarded(logger, &current)),
        };

        metrics::record_stage_attempt(stage, error.kind());
        if job.is_terminal() {
            logger.log_failure(&reason);
            metrics::record_job_failed(stage, error.kind());
            notify_detached(&self.notifier, NotificationEvent::failed(job.id.clone(), stage, &reason));
            return Ok(AdvanceOutcome::Failed { reason });
        }

        let attempt = job.current_attempts();
        let delay = backoff_delay(self.config.backoff_unit, attempt);
        logger.log_retry(attempt, delay, &reason);
        Ok(AdvanceOutcome::RetryScheduled { attempt, delay })
    }

    /// Write only while the job is still non-terminal at `stage`.
    async fn guarded<M>(&self, job_id: &JobId, stage: Stage, mutation: M) -> WorkerResult<Guarded>
    where
        M: Fn(&mut Job) + Send + Sync,
    {
        Ok(update_where(
            self.store.as_ref(),
            job_id,
            self.config.max_conflict_retries + 1,
            |j| !j.is_terminal() && j.stage == stage,
            mutation,
        )
        .await?)
    }
}

fn discarded(logger: &JobLogger, current: &Job) -> AdvanceOutcome {
    if current.is_terminal() {
        logger.log_discarded(&format!("job is {}", current.status));
        AdvanceOutcome::Discarded { terminal: true }
    } else {
        logger.log_discarded(&format!("job moved on to {}", current.stage));
        AdvanceOutcome::Discarded { terminal: false }
    }
}
