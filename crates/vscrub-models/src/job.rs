//! Job definitions for the processing pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Priority class of a job. Affects dequeue order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Standard,
    Priority,
}

impl Tier {
    /// Score used by the queue; higher is dequeued first.
    pub fn priority_score(&self) -> u32 {
        match self {
            Tier::Standard => 0,
            Tier::Priority => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Priority => "priority",
        }
    }
}

/// Region processing mode, selected once at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Blur the tracked region
    Blur,
    /// Remove (inpaint) the tracked region
    Removal,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Blur => "blur",
            Mode::Removal => "removal",
        }
    }
}

/// Pipeline stage. Declaration order is execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Validate,
    Extract,
    Track,
    Process,
    Encode,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Validate,
        Stage::Extract,
        Stage::Track,
        Stage::Process,
        Stage::Encode,
    ];

    /// The stage that follows this one, or `None` after Encode.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Validate => Some(Stage::Extract),
            Stage::Extract => Some(Stage::Track),
            Stage::Track => Some(Stage::Process),
            Stage::Process => Some(Stage::Encode),
            Stage::Encode => None,
        }
    }

    /// Zero-based position in the pipeline.
    pub fn index(&self) -> u8 {
        match self {
            Stage::Validate => 0,
            Stage::Extract => 1,
            Stage::Track => 2,
            Stage::Process => 3,
            Stage::Encode => 4,
        }
    }

    /// Progress reported once this stage has completed.
    pub fn completed_progress(&self) -> u8 {
        (self.index() + 1) * 20
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Extract => "extract",
            Stage::Track => "track",
            Stage::Process => "process",
            Stage::Encode => "encode",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker to pick up the first stage
    #[default]
    Queued,
    /// At least one stage attempt has started
    Running,
    /// Encode finished successfully
    Complete,
    /// Terminal failure (fatal error, cancellation or delivery exhaustion)
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// Complete and Failed are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Staying in the same non-terminal status is allowed so that
    /// bookkeeping writes (heartbeats, retries) can bump the version.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Complete) => false,
            (JobStatus::Queued, _) => true,
            (JobStatus::Running, JobStatus::Queued) => false,
            (JobStatus::Running, _) => true,
            (JobStatus::Complete | JobStatus::Failed, _) => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point the segmentation engine starts tracking from.
///
/// Coordinates are normalized to the frame (0.0..=1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentationPoint {
    /// Frame index the point refers to
    pub frame: u32,
    pub x: f32,
    pub y: f32,
}

impl SegmentationPoint {
    pub fn new(frame: u32, x: f32, y: f32) -> Self {
        Self { frame, x, y }
    }

    pub fn is_normalized(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// A submitted processing request and its pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Submitting user
    pub owner_id: String,

    pub tier: Tier,

    pub mode: Mode,

    /// Blob key of the uploaded source video
    pub input_ref: String,

    pub segmentation_point: SegmentationPoint,

    /// Current pipeline position
    #[serde(default)]
    pub stage: Stage,

    #[serde(default)]
    pub status: JobStatus,

    /// Retry counter per stage
    #[serde(default)]
    pub attempts: BTreeMap<Stage, u32>,

    /// Blob keys of completed stage artifacts
    #[serde(default)]
    pub outputs: BTreeMap<Stage, String>,

    /// Engine batch size; halved on resource exhaustion
    pub batch_size: u32,

    /// Optimistic concurrency version, bumped on every persisted mutation
    #[serde(default)]
    pub version: u64,

    /// Progress (0-100)
    #[serde(default)]
    pub progress_percent: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Last heartbeat from the worker holding the lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in its initial state (Queued, Validate, version 0).
    pub fn new(
        owner_id: impl Into<String>,
        tier: Tier,
        mode: Mode,
        input_ref: impl Into<String>,
        segmentation_point: SegmentationPoint,
        batch_size: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id: owner_id.into(),
            tier,
            mode,
            input_ref: input_ref.into(),
            segmentation_point,
            stage: Stage::Validate,
            status: JobStatus::Queued,
            attempts: BTreeMap::new(),
            outputs: BTreeMap::new(),
            batch_size: batch_size.max(1),
            version: 0,
            progress_percent: 0,
            error_detail: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Attempts made so far on the current stage.
    pub fn current_attempts(&self) -> u32 {
        self.attempts.get(&self.stage).copied().unwrap_or(0)
    }

    /// Blob key of the final encoded output, once complete.
    pub fn output_ref(&self) -> Option<&str> {
        self.outputs.get(&Stage::Encode).map(String::as_str)
    }

    /// Move from Queued to Running. No-op if already running.
    pub fn mark_running(&mut self) {
        if self.status == JobStatus::Queued {
            self.status = JobStatus::Running;
            self.started_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
    }

    /// Record a successful stage and move to the next one.
    ///
    /// Completing Encode transitions the job to Complete.
    pub fn advance(&mut self, output_ref: impl Into<String>) {
        let now = Utc::now();
        self.outputs.insert(self.stage, output_ref.into());
        self.progress_percent = self.stage.completed_progress();
        match self.stage.next() {
            Some(next) => {
                self.stage = next;
                self.attempts.insert(next, 0);
            }
            None => {
                self.status = JobStatus::Complete;
                self.progress_percent = 100;
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
    }

    /// Count a failed attempt on the current stage and return the new count.
    pub fn record_attempt_failure(&mut self) -> u32 {
        let count = self.attempts.entry(self.stage).or_insert(0);
        *count += 1;
        self.updated_at = Utc::now();
        *count
    }

    /// Halve the engine batch size (never below 1).
    pub fn halve_batch_size(&mut self) {
        self.batch_size = (self.batch_size / 2).max(1);
    }

    /// Mark the job as failed.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error_detail = Some(reason.into());
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Stamp a worker heartbeat.
    pub fn record_heartbeat(&mut self) {
        let now = Utc::now();
        self.last_heartbeat_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            "user-1",
            Tier::Standard,
            Mode::Blur,
            "uploads/user-1/video.mp4",
            SegmentationPoint::new(0, 0.5, 0.5),
            16,
        )
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.stage, Stage::Validate);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.version, 0);
        assert_eq!(job.current_attempts(), 0);
    }

    #[test]
    fn test_advance_through_pipeline() {
        let mut job = job();
        job.mark_running();
        for stage in Stage::ALL {
            assert_eq!(job.stage, stage);
            job.advance(format!("jobs/{}/{}", job.id, stage));
        }
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress_percent, 100);
        assert!(job.output_ref().unwrap().ends_with("encode"));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_advance_resets_next_stage_attempts() {
        let mut job = job();
        job.mark_running();
        assert_eq!(job.record_attempt_failure(), 1);
        job.advance("jobs/x/validate");
        assert_eq!(job.stage, Stage::Extract);
        assert_eq!(job.current_attempts(), 0);
        assert_eq!(job.progress_percent, 20);
    }

    #[test]
    fn test_status_transitions() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Complete));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_batch_size_floor() {
        let mut job = job();
        job.batch_size = 3;
        job.halve_batch_size();
        assert_eq!(job.batch_size, 1);
        job.halve_batch_size();
        assert_eq!(job.batch_size, 1);
    }

    #[test]
    fn test_attempts_serialize_with_stage_keys() {
        let mut job = job();
        job.record_attempt_failure();
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["attempts"]["validate"], 1);
        let back: Job = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }
}
