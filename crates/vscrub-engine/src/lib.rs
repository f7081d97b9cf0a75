//! External collaborators of the pipeline.
//!
//! The orchestration core never touches pixels or codecs itself; it drives
//! these seams:
//! - `SegmentationEngine`: track the selected object across frames
//! - `RegionEngine`: blur or remove the tracked region (one per `Mode`)
//! - `MediaCodec`: split a container into frames and encode them back
//! - `BlobStore`: stage artifacts under deterministic keys
//! - `NotificationSink`: fire-and-forget lifecycle events
//!
//! Implementations: an HTTP client for a remote engine service, in-process
//! local engines for development, in-memory and Redis blob stores, and
//! tracing / Redis pub/sub notification sinks.

pub mod blob;
pub mod error;
pub mod http;
pub mod local;
pub mod notify;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use vscrub_models::{Mode, SegmentationPoint};

pub use blob::{BlobStore, InMemoryBlobStore, RedisBlobStore};
pub use error::{EngineError, EngineResult};
pub use http::{EngineClient, EngineClientConfig, HttpRegionEngine};
pub use local::{LocalCodec, LocalRegionEngine, LocalSegmentation};
pub use notify::{
    notify_detached, CollectingNotificationSink, LogNotificationSink, NotificationSink,
    RedisNotificationSink,
};
pub use types::{Frames, MaskSequence, ProcessingParams};

/// Locates and tracks the object at a seed point.
#[async_trait]
pub trait SegmentationEngine: Send + Sync {
    async fn segment_and_track(
        &self,
        frames: &Frames,
        point: &SegmentationPoint,
        params: &ProcessingParams,
    ) -> EngineResult<MaskSequence>;
}

/// Applies an effect to the masked region of each frame.
#[async_trait]
pub trait RegionEngine: Send + Sync {
    /// The job mode this engine serves.
    fn mode(&self) -> Mode;

    async fn apply(
        &self,
        frames: &Frames,
        masks: &MaskSequence,
        params: &ProcessingParams,
    ) -> EngineResult<Frames>;
}

/// Container decode/encode.
#[async_trait]
pub trait MediaCodec: Send + Sync {
    async fn extract(&self, input: &[u8]) -> EngineResult<Frames>;

    async fn encode(&self, frames: &Frames) -> EngineResult<Vec<u8>>;
}

/// One region engine per mode; picked once per job.
#[derive(Clone)]
pub struct RegionEngines {
    blur: Arc<dyn RegionEngine>,
    removal: Arc<dyn RegionEngine>,
}

impl RegionEngines {
    pub fn new(blur: Arc<dyn RegionEngine>, removal: Arc<dyn RegionEngine>) -> Self {
        Self { blur, removal }
    }

    pub fn for_mode(&self, mode: Mode) -> Arc<dyn RegionEngine> {
        match mode {
            Mode::Blur => Arc::clone(&self.blur),
            Mode::Removal => Arc::clone(&self.removal),
        }
    }
}

/// Everything a stage needs from the outside world.
#[derive(Clone)]
pub struct Engines {
    pub segmentation: Arc<dyn SegmentationEngine>,
    pub regions: RegionEngines,
    pub codec: Arc<dyn MediaCodec>,
    pub blobs: Arc<dyn BlobStore>,
}

impl Engines {
    /// In-process engines with an in-memory blob store.
    pub fn local() -> Self {
        Self::local_with_blobs(Arc::new(InMemoryBlobStore::new()))
    }

    /// In-process engines over the given blob store.
    pub fn local_with_blobs(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            segmentation: Arc::new(LocalSegmentation::default()),
            regions: RegionEngines::new(
                Arc::new(LocalRegionEngine::new(Mode::Blur)),
                Arc::new(LocalRegionEngine::new(Mode::Removal)),
            ),
            codec: Arc::new(LocalCodec::default()),
            blobs,
        }
    }

    /// Remote engine service over the given blob store.
    pub fn remote(client: Arc<EngineClient>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            segmentation: client.clone(),
            regions: RegionEngines::new(
                Arc::new(HttpRegionEngine::new(client.clone(), Mode::Blur)),
                Arc::new(HttpRegionEngine::new(client.clone(), Mode::Removal)),
            ),
            codec: client,
            blobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_engine_selected_by_mode() {
        let engines = Engines::local();
        assert_eq!(engines.regions.for_mode(Mode::Blur).mode(), Mode::Blur);
        assert_eq!(engines.regions.for_mode(Mode::Removal).mode(), Mode::Removal);
    }
}
