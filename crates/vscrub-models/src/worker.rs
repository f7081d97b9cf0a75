//! Worker pool membership.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::JobId;

/// Unique identifier for a pool member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        Self(format!("worker-{}", Uuid::new_v4()))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    /// Waiting on a bounded lease call
    Leasing,
    /// Running a stage attempt
    Processing,
    /// Interrupted; releasing work before exit
    Draining,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Leasing => "leasing",
            WorkerState::Processing => "processing",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        }
    }

    /// Idle or waiting for work; safe to stop.
    pub fn is_idle(&self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Leasing)
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, WorkerState::Draining | WorkerState::Terminated)
    }
}

/// Observable snapshot of a pool member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Last successful lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_lease_at: Option<DateTime<Utc>>,
    /// Set by the pool controller; honoured once the worker is idle
    #[serde(default)]
    pub termination_requested: bool,
}

impl WorkerInfo {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            current_job_id: None,
            last_heartbeat_at: None,
            last_lease_at: None,
            termination_requested: false,
        }
    }
}
