//! Notification sinks.
//!
//! Notifications are best effort: the pipeline never waits on delivery and a
//! failed publish is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vscrub_models::{JobId, NotificationEvent};

use crate::error::EngineResult;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> EngineResult<()>;
}

/// Publish `event` on a background task.
pub fn notify_detached(sink: &Arc<dyn NotificationSink>, event: NotificationEvent) {
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.notify(&event).await {
            warn!(
                job_id = %event.job_id,
                kind = event.kind.as_str(),
                "Failed to publish notification: {}",
                e
            );
        }
    });
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, event: &NotificationEvent) -> EngineResult<()> {
        info!(
            job_id = %event.job_id,
            kind = event.kind.as_str(),
            payload = %event.payload,
            "Job notification"
        );
        Ok(())
    }
}

/// Publishes events on a per-job Redis channel.
pub struct RedisNotificationSink {
    client: redis::Client,
}

impl RedisNotificationSink {
    pub fn new(redis_url: &str) -> EngineResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("notify:{}", job_id)
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn notify(&self, event: &NotificationEvent) -> EngineResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(&event.job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing notification to {}", channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }
}

/// Keeps every event in memory, in publish order.
#[derive(Debug, Default)]
pub struct CollectingNotificationSink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl CollectingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_for(&self, job_id: &JobId) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| &e.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for CollectingNotificationSink {
    async fn notify(&self, event: &NotificationEvent) -> EngineResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
