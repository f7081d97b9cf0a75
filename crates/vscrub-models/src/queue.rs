//! Queue delivery metadata.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{JobId, WorkerId};

/// A leased pointer to a job plus its delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueueEntry {
    pub job_id: JobId,
    /// Higher scores are dequeued first
    pub priority_score: u32,
    /// Times the entry was redelivered after a lease expired
    pub delivery_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<WorkerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub enqueued_at: DateTime<Utc>,
}

/// An entry retired after exceeding the redelivery ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeadLetter {
    pub job_id: JobId,
    pub delivery_count: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Snapshot of outstanding queue work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueueDepth {
    /// Visible and waiting for a lease
    pub pending: u64,
    /// Waiting out a retry backoff
    pub delayed: u64,
    /// Leased and not yet completed
    pub leased: u64,
}

impl QueueDepth {
    /// Total outstanding work: everything that still needs a worker.
    pub fn total(&self) -> u64 {
        self.pending + self.delayed + self.leased
    }
}
