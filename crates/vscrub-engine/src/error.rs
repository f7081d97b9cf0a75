//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Segmentation confidence too low: {0:.2}")]
    LowConfidence(f32),

    #[error("Engine timed out after {0} seconds")]
    Timeout(u64),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine failed: {0}")]
    Failed(String),

    /// Input the engine can never process (corrupt container, bad point).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl EngineError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Retrying cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvalidInput(_) | EngineError::NotFound(_))
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, EngineError::ResourceExhausted(_))
    }

    /// Worth retrying inside a single HTTP call.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Unavailable(_) | EngineError::Timeout(_) => true,
            EngineError::Network(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(EngineError::invalid_input("corrupt").is_fatal());
        assert!(EngineError::NotFound("jobs/x/extract".into()).is_fatal());
        assert!(!EngineError::LowConfidence(0.1).is_fatal());
        assert!(!EngineError::Timeout(30).is_fatal());
        assert!(EngineError::ResourceExhausted("oom".into()).is_resource_exhausted());
        assert!(EngineError::Unavailable("503".into()).is_transient());
        assert!(!EngineError::failed("boom").is_transient());
    }
}
