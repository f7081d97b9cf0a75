//! HTTP client for a remote engine service.
//!
//! The service exposes one endpoint per collaborator operation; binary
//! payloads travel as base64 inside JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vscrub_models::{Mode, SegmentationPoint};

use crate::error::{EngineError, EngineResult};
use crate::types::{Frames, MaskSequence, ProcessingParams};
use crate::{MediaCodec, RegionEngine, SegmentationEngine};

/// Configuration for the engine client.
#[derive(Debug, Clone)]
pub struct EngineClientConfig {
    /// Base URL of the engine service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Retries for transient failures within one call
    pub max_retries: u32,
    /// Base delay between those retries
    pub retry_backoff: Duration,
    /// Tracks below this confidence are reported as `LowConfidence`
    pub min_confidence: f32,
}

impl Default for EngineClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            min_confidence: 0.5,
        }
    }
}

impl EngineClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("ENGINE_SERVICE_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("ENGINE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff: defaults.retry_backoff,
            min_confidence: std::env::var("ENGINE_MIN_CONFIDENCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_confidence),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SegmentRequest<'a> {
    frames: &'a Frames,
    point: &'a SegmentationPoint,
    params: &'a ProcessingParams,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegionRequest<'a> {
    frames: &'a Frames,
    masks: &'a MaskSequence,
    params: &'a ProcessingParams,
}

#[derive(Serialize, Deserialize)]
struct BinaryBody {
    data: String,
}

/// Client for the engine service.
pub struct EngineClient {
    http: Client,
    config: EngineClientConfig,
}

impl EngineClient {
    /// Create a new engine client.
    pub fn new(config: EngineClientConfig) -> EngineResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(EngineError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Self::new(EngineClientConfig::from_env())
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> EngineResult<R>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("Sending engine request to {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(e))?;

                let status = response.status();
                if status.is_success() {
                    Ok(response)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(self.classify_status(status, body))
                }
            })
            .await?;

        Ok(response.json().await?)
    }

    fn map_send_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(self.config.timeout.as_secs())
        } else {
            EngineError::Network(e)
        }
    }

    fn classify_status(&self, status: StatusCode, body: String) -> EngineError {
        let detail = format!("engine service returned {}: {}", status, body);
        match status.as_u16() {
            400 | 415 | 422 => EngineError::InvalidInput(detail),
            408 | 504 => EngineError::Timeout(self.config.timeout.as_secs()),
            429 | 507 => EngineError::ResourceExhausted(detail),
            502 | 503 => EngineError::Unavailable(detail),
            _ => EngineError::Failed(detail),
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> EngineResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = retry_delay(self.config.retry_backoff, attempt);
                    warn!(
                        "Engine request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential delay before retry `attempt` (0-based), saturating on overflow.
fn retry_delay(backoff: Duration, attempt: u32) -> Duration {
    backoff.saturating_mul(2u32.saturating_pow(attempt))
}

#[async_trait]
impl SegmentationEngine for EngineClient {
    async fn segment_and_track(
        &self,
        frames: &Frames,
        point: &SegmentationPoint,
        params: &ProcessingParams,
    ) -> EngineResult<MaskSequence> {
        let masks: MaskSequence = self
            .post("/v1/segment", &SegmentRequest { frames, point, params })
            .await?;

        if masks.confidence < self.config.min_confidence {
            return Err(EngineError::LowConfidence(masks.confidence));
        }
        Ok(masks)
    }
}

#[async_trait]
impl MediaCodec for EngineClient {
    async fn extract(&self, input: &[u8]) -> EngineResult<Frames> {
        self.post("/v1/extract", &BinaryBody { data: STANDARD.encode(input) })
            .await
    }

    async fn encode(&self, frames: &Frames) -> EngineResult<Vec<u8>> {
        let body: BinaryBody = self.post("/v1/encode", frames).await?;
        STANDARD
            .decode(body.data)
            .map_err(|e| EngineError::failed(format!("invalid encoded payload: {}", e)))
    }
}

/// Region engine backed by the service endpoint for one mode.
pub struct HttpRegionEngine {
    client: Arc<EngineClient>,
    mode: Mode,
}

impl HttpRegionEngine {
    pub fn new(client: Arc<EngineClient>, mode: Mode) -> Self {
        Self { client, mode }
    }
}

#[async_trait]
impl RegionEngine for HttpRegionEngine {
    fn mode(&self) -> Mode {
        self.mode
    }

    async fn apply(
        &self,
        frames: &Frames,
        masks: &MaskSequence,
        params: &ProcessingParams,
    ) -> EngineResult<Frames> {
        let path = format!("/v1/regions/{}", self.mode.as_str());
        self.client
            .post(&path, &RegionRequest { frames, masks, params })
            .await
    }
}
