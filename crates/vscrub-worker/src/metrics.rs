//! Prometheus metrics for the pipeline and the worker pool.

use metrics::{counter, gauge};
use vscrub_models::{QueueDepth, Stage};

/// Metric names as constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_SUBMITTED_TOTAL: &str = "vscrub_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vscrub_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vscrub_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vscrub_jobs_cancelled_total";
    pub const STAGE_ATTEMPTS_TOTAL: &str = "vscrub_stage_attempts_total";

    // Queue
    pub const QUEUE_DEPTH: &str = "vscrub_queue_depth";
    pub const DEAD_LETTERS_TOTAL: &str = "vscrub_dead_letters_total";

    // Pool
    pub const POOL_SIZE: &str = "vscrub_pool_size";
    pub const SCALE_ACTIONS_TOTAL: &str = "vscrub_scale_actions_total";
}

pub fn record_job_submitted(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(stage: Stage, reason: &str) {
    let labels = [("stage", stage.to_string()), ("reason", reason.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

/// Record a finished stage attempt. `outcome` is `success` or an error kind.
pub fn record_stage_attempt(stage: Stage, outcome: &str) {
    let labels = [("stage", stage.to_string()), ("outcome", outcome.to_string())];
    counter!(names::STAGE_ATTEMPTS_TOTAL, &labels).increment(1);
}

pub fn record_dead_letters(count: usize) {
    counter!(names::DEAD_LETTERS_TOTAL).increment(count as u64);
}

pub fn set_queue_depth(depth: &QueueDepth) {
    gauge!(names::QUEUE_DEPTH, "state" => "pending").set(depth.pending as f64);
    gauge!(names::QUEUE_DEPTH, "state" => "delayed").set(depth.delayed as f64);
    gauge!(names::QUEUE_DEPTH, "state" => "leased").set(depth.leased as f64);
}

pub fn set_pool_size(live: usize) {
    gauge!(names::POOL_SIZE).set(live as f64);
}

/// Record a scaling action (`launch` or `terminate`).
pub fn record_scale_action(direction: &str, count: usize) {
    let labels = [("direction", direction.to_string())];
    counter!(names::SCALE_ACTIONS_TOTAL, &labels).increment(count as u64);
}
