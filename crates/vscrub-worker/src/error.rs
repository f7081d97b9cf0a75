//! Worker error types and the stage failure taxonomy.

use thiserror::Error;
use vscrub_engine::EngineError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Reason recorded when a caller cancels a job.
pub const CANCELLED: &str = "cancelled";

/// Reason recorded when the queue gives up redelivering a job.
pub const DELIVERY_EXHAUSTED: &str = "delivery exhausted";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] vscrub_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] vscrub_queue::QueueError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::Store(vscrub_store::StoreError::NotFound(_)))
    }
}

/// Why a stage attempt failed.
///
/// Interruption and delivery exhaustion are handled outside stage execution
/// (see `AdvanceOutcome::Interrupted` and the dead-letter reaper).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    /// Bad request or input; never retried.
    #[error("{0}")]
    Validation(String),

    /// Store, blob or network hiccup.
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),

    #[error("{message}")]
    Engine { message: String, fatal: bool },

    /// Retryable with a halved batch size.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl StageError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        match self {
            StageError::Validation(_) => true,
            StageError::Engine { fatal, .. } => *fatal,
            StageError::TransientInfra(_) | StageError::ResourceExhausted(_) => false,
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, StageError::ResourceExhausted(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Validation(_) => "validation",
            StageError::TransientInfra(_) => "transient_infra",
            StageError::Engine { .. } => "engine",
            StageError::ResourceExhausted(_) => "resource_exhausted",
        }
    }
}

impl From<EngineError> for StageError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ResourceExhausted(msg) => StageError::ResourceExhausted(msg),
            EngineError::Redis(_) | EngineError::Network(_) => {
                StageError::TransientInfra(e.to_string())
            }
            other => StageError::Engine {
                fatal: other.is_fatal(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_classification() {
        assert!(StageError::from(EngineError::invalid_input("corrupt")).is_fatal());
        assert!(!StageError::from(EngineError::Timeout(30)).is_fatal());
        assert!(!StageError::from(EngineError::LowConfidence(0.2)).is_fatal());

        let exhausted = StageError::from(EngineError::ResourceExhausted("gpu".into()));
        assert!(exhausted.is_resource_exhausted());
        assert!(!exhausted.is_fatal());
    }

    #[test]
    fn test_validation_is_fatal() {
        assert!(StageError::validation("empty input").is_fatal());
        assert_eq!(StageError::validation("empty input").to_string(), "empty input");
    }
}
