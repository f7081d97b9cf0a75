//! In-process engines for local development and tests.
//!
//! Frames are fixed-size chunks of the input bytes; the tracker masks every
//! byte of every frame; blur flattens masked bytes to the frame mean and
//! removal zeroes them.

use async_trait::async_trait;
use vscrub_models::{Mode, SegmentationPoint};

use crate::error::{EngineError, EngineResult};
use crate::types::{Frames, MaskSequence, ProcessingParams};
use crate::{MediaCodec, RegionEngine, SegmentationEngine};

const DEFAULT_FRAME_SIZE: usize = 4096;

/// Chunking codec.
#[derive(Debug, Clone)]
pub struct LocalCodec {
    frame_size: usize,
}

impl LocalCodec {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
        }
    }
}

impl Default for LocalCodec {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}

#[async_trait]
impl MediaCodec for LocalCodec {
    async fn extract(&self, input: &[u8]) -> EngineResult<Frames> {
        if input.is_empty() {
            return Err(EngineError::invalid_input("input contains no data"));
        }
        Ok(Frames::new(
            input.chunks(self.frame_size).map(<[u8]>::to_vec).collect(),
        ))
    }

    async fn encode(&self, frames: &Frames) -> EngineResult<Vec<u8>> {
        if frames.is_empty() {
            return Err(EngineError::invalid_input("no frames to encode"));
        }
        Ok(frames.frames.concat())
    }
}

/// Tracker that selects the whole frame.
#[derive(Debug, Clone, Default)]
pub struct LocalSegmentation;

#[async_trait]
impl SegmentationEngine for LocalSegmentation {
    async fn segment_and_track(
        &self,
        frames: &Frames,
        point: &SegmentationPoint,
        _params: &ProcessingParams,
    ) -> EngineResult<MaskSequence> {
        if !point.is_normalized() {
            return Err(EngineError::invalid_input("segmentation point outside frame"));
        }
        if point.frame as usize >= frames.len() {
            return Err(EngineError::invalid_input(format!(
                "seed frame {} beyond {} frames",
                point.frame,
                frames.len()
            )));
        }
        Ok(MaskSequence {
            masks: frames.frames.iter().map(|f| vec![1; f.len()]).collect(),
            confidence: 1.0,
        })
    }
}

/// Blur or removal over the masked bytes.
#[derive(Debug, Clone)]
pub struct LocalRegionEngine {
    mode: Mode,
}

impl LocalRegionEngine {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    fn apply_frame(&self, frame: &[u8], mask: &[u8]) -> Vec<u8> {
        let fill = match self.mode {
            Mode::Blur => {
                let sum: u64 = frame.iter().map(|&b| u64::from(b)).sum();
                (sum / frame.len().max(1) as u64) as u8
            }
            Mode::Removal => 0,
        };
        frame
            .iter()
            .zip(mask.iter().chain(std::iter::repeat(&0)))
            .map(|(&px, &m)| if m != 0 { fill } else { px })
            .collect()
    }
}

#[async_trait]
impl RegionEngine for LocalRegionEngine {
    fn mode(&self) -> Mode {
        self.mode
    }

    async fn apply(
        &self,
        frames: &Frames,
        masks: &MaskSequence,
        params: &ProcessingParams,
    ) -> EngineResult<Frames> {
        if frames.len() != masks.masks.len() {
            return Err(EngineError::failed(format!(
                "{} frames but {} masks",
                frames.len(),
                masks.masks.len()
            )));
        }

        let batch = params.batch_size.max(1) as usize;
        let mut out = Vec::with_capacity(frames.len());
        for (frame_batch, mask_batch) in frames.frames.chunks(batch).zip(masks.masks.chunks(batch)) {
            for (frame, mask) in frame_batch.iter().zip(mask_batch) {
                out.push(self.apply_frame(frame, mask));
            }
            tokio::task::yield_now().await;
        }
        Ok(Frames::new(out))
    }
}
