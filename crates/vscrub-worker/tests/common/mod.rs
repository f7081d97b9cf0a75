//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use vscrub_engine::{
    BlobStore, CollectingNotificationSink, EngineError, EngineResult, Engines, Frames,
    InMemoryBlobStore, LocalSegmentation, MaskSequence, ProcessingParams, SegmentationEngine,
};
use vscrub_models::{JobId, Mode, NotificationEvent, SegmentationPoint, Tier};
use vscrub_queue::InMemoryJobQueue;
use vscrub_store::InMemoryJobStore;
use vscrub_worker::{
    interrupt_channel, InterruptHandle, InterruptSignal, JobService, PipelineConfig, StateMachine,
    SubmitRequest, WorkerConfig,
};

pub const INPUT_REF: &str = "uploads/clip.mp4";

/// How a scripted segmentation call behaves.
#[derive(Clone)]
pub enum Script {
    Succeed,
    Fail(fn() -> EngineError),
    /// Fail the first `n` calls, then succeed.
    FailTimes(u32, fn() -> EngineError),
}

/// Segmentation engine with scripted failures and an optional gate that
/// holds each call until opened.
pub struct ScriptedSegmentation {
    script: Script,
    calls: AtomicU32,
    gated: bool,
    pub entered: Notify,
    pub gate: Notify,
    batch_sizes: std::sync::Mutex<Vec<u32>>,
}

impl ScriptedSegmentation {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
            gated: false,
            entered: Notify::new(),
            gate: Notify::new(),
            batch_sizes: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn gated(script: Script) -> Self {
        Self {
            gated: true,
            ..Self::new(script)
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<u32> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SegmentationEngine for ScriptedSegmentation {
    async fn segment_and_track(
        &self,
        frames: &Frames,
        point: &SegmentationPoint,
        params: &ProcessingParams,
    ) -> EngineResult<MaskSequence> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(params.batch_size);

        if self.gated {
            self.entered.notify_one();
            self.gate.notified().await;
        }

        match &self.script {
            Script::Succeed => {}
            Script::Fail(error) => return Err(error()),
            Script::FailTimes(n, error) if call < *n => return Err(error()),
            Script::FailTimes(..) => {}
        }
        LocalSegmentation.segment_and_track(frames, point, params).await
    }
}

/// Blob store that serves reads from `inner` and rejects every write.
pub struct ReadOnlyBlobs {
    pub inner: Arc<InMemoryBlobStore>,
}

#[async_trait]
impl BlobStore for ReadOnlyBlobs {
    async fn put(&self, _key: &str, _bytes: Vec<u8>, _ttl: Option<Duration>) -> EngineResult<()> {
        Err(EngineError::Unavailable("blob store is read-only".to_string()))
    }

    async fn get(&self, key: &str) -> EngineResult<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub notifier: Arc<CollectingNotificationSink>,
    pub segmentation: Arc<ScriptedSegmentation>,
    pub engines: Engines,
    pub config: WorkerConfig,
    pub interrupt: InterruptHandle,
    pub signal: InterruptSignal,
}

impl Harness {
    pub async fn new(segmentation: ScriptedSegmentation) -> Self {
        Self::with_queue(segmentation, InMemoryJobQueue::new(5)).await
    }

    pub async fn with_queue(segmentation: ScriptedSegmentation, queue: InMemoryJobQueue) -> Self {
        let blobs = Arc::new(InMemoryBlobStore::new());
        blobs
            .put(INPUT_REF, b"frame data for a short clip".to_vec(), None)
            .await
            .unwrap();

        let segmentation = Arc::new(segmentation);
        let mut engines = Engines::local_with_blobs(blobs.clone());
        engines.segmentation = segmentation.clone();

        let (interrupt, signal) = interrupt_channel();
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(queue),
            blobs,
            notifier: Arc::new(CollectingNotificationSink::new()),
            segmentation,
            engines,
            config: WorkerConfig::default(),
            interrupt,
            signal,
        }
    }

    pub fn machine(&self) -> Arc<StateMachine> {
        Arc::new(StateMachine::new(
            self.store.clone(),
            self.engines.clone(),
            self.notifier.clone(),
            PipelineConfig::from(&self.config),
        ))
    }

    pub fn service(&self) -> JobService {
        JobService::new(self.store.clone(), self.queue.clone(), self.config.default_batch_size)
    }

    pub async fn submit(&self, tier: Tier) -> JobId {
        self.service()
            .submit(SubmitRequest {
                owner_id: "user-1".to_string(),
                tier,
                mode: Mode::Blur,
                input_ref: INPUT_REF.to_string(),
                segmentation_point: SegmentationPoint::new(0, 0.5, 0.5),
            })
            .await
            .unwrap()
    }

    /// Make every artifact write fail from now on.
    pub fn reject_blob_writes(&mut self) {
        self.engines.blobs = Arc::new(ReadOnlyBlobs {
            inner: self.blobs.clone(),
        });
    }

    pub async fn blobs_remove_input(&self) {
        self.blobs.delete(INPUT_REF).await.unwrap();
    }

    /// Wait for detached notifications to land.
    pub async fn events_for(&self, job_id: &JobId, expected: usize) -> Vec<NotificationEvent> {
        for _ in 0..100 {
            let events = self.notifier.events_for(job_id).await;
            if events.len() >= expected {
                return events;
            }
            tokio::task::yield_now().await;
        }
        self.notifier.events_for(job_id).await
    }
}

pub fn timeout_error() -> EngineError {
    EngineError::Timeout(30)
}

pub fn invalid_input_error() -> EngineError {
    EngineError::invalid_input("corrupt frames")
}

pub fn exhausted_error() -> EngineError {
    EngineError::ResourceExhausted("out of GPU memory".to_string())
}

/// Poll `check` until it holds, letting paused time advance between polls.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..10_000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}
