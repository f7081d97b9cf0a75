//! Shared data models for the vscrub orchestration core.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, pipeline stages and statuses
//! - Queue entries and dead letters
//! - Worker pool membership
//! - Notification events and caller-facing status views

pub mod event;
pub mod job;
pub mod queue;
pub mod status;
pub mod worker;

// Re-export common types
pub use event::{NotificationEvent, NotificationKind};
pub use job::{Job, JobId, JobStatus, Mode, SegmentationPoint, Stage, Tier};
pub use queue::{DeadLetter, QueueDepth, QueueEntry};
pub use status::JobStatusView;
pub use worker::{WorkerId, WorkerInfo, WorkerState};
