//! HTTP handlers.

pub mod health;
pub mod jobs;

pub use health::{health, ready};
pub use jobs::{cancel_job, get_job_status, submit_job};
