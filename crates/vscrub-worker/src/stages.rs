//! Stage bodies.
//!
//! Each stage reads the previous stage's artifact, calls one collaborator and
//! writes its own artifact to `jobs/{id}/{stage}`. Keys are deterministic and
//! writes overwrite, so re-running an attempt is harmless.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use vscrub_engine::{Engines, Frames, MaskSequence, ProcessingParams};
use vscrub_models::{Job, JobId, Stage};

use crate::error::StageError;

/// Blob key of a stage artifact.
pub fn artifact_key(job_id: &JobId, stage: Stage) -> String {
    format!("jobs/{}/{}", job_id, stage)
}

/// Run one attempt of the job's current stage, returning the artifact key.
pub async fn run_stage(job: &Job, engines: &Engines, ttl: Duration) -> Result<String, StageError> {
    let params = ProcessingParams {
        batch_size: job.batch_size.max(1),
    };
    let key = artifact_key(&job.id, job.stage);

    match job.stage {
        Stage::Validate => {
            let manifest = validate(job, engines).await?;
            put_json(engines, &key, &manifest, ttl)
                .await
                .map_err(|e| StageError::validation(format!("manifest not written: {}", e)))?;
        }
        Stage::Extract => {
            let input = engines.blobs.get(&job.input_ref).await?;
            let frames = engines.codec.extract(&input).await?;
            put_json(engines, &key, &frames, ttl).await?;
        }
        Stage::Track => {
            let frames: Frames = load_json(job, engines, Stage::Extract).await?;
            let masks = engines
                .segmentation
                .segment_and_track(&frames, &job.segmentation_point, &params)
                .await?;
            put_json(engines, &key, &masks, ttl).await?;
        }
        Stage::Process => {
            let frames: Frames = load_json(job, engines, Stage::Extract).await?;
            let masks: MaskSequence = load_json(job, engines, Stage::Track).await?;
            let processed = engines
                .regions
                .for_mode(job.mode)
                .apply(&frames, &masks, &params)
                .await?;
            put_json(engines, &key, &processed, ttl).await?;
        }
        Stage::Encode => {
            let processed: Frames = load_json(job, engines, Stage::Process).await?;
            let encoded = engines.codec.encode(&processed).await?;
            engines.blobs.put(&key, encoded, Some(ttl)).await?;
        }
    }

    Ok(key)
}

/// Check the request and the input blob. Every failure here is fatal.
async fn validate(job: &Job, engines: &Engines) -> Result<serde_json::Value, StageError> {
    if job.owner_id.trim().is_empty() {
        return Err(StageError::validation("owner id is empty"));
    }
    if job.input_ref.trim().is_empty() {
        return Err(StageError::validation("input reference is empty"));
    }
    if !job.segmentation_point.is_normalized() {
        return Err(StageError::validation("segmentation point is outside the frame"));
    }

    let input = engines
        .blobs
        .get(&job.input_ref)
        .await
        .map_err(|e| StageError::validation(format!("input unavailable: {}", e)))?;
    if input.is_empty() {
        return Err(StageError::validation("input is empty"));
    }

    Ok(serde_json::json!({
        "inputRef": job.input_ref,
        "bytes": input.len(),
        "mode": job.mode,
    }))
}

async fn load_json<T: DeserializeOwned>(
    job: &Job,
    engines: &Engines,
    stage: Stage,
) -> Result<T, StageError> {
    let key = job
        .outputs
        .get(&stage)
        .ok_or_else(|| StageError::fatal(format!("missing {} artifact", stage)))?;
    let bytes = engines.blobs.get(key).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StageError::fatal(format!("corrupt {} artifact: {}", stage, e)))
}

async fn put_json<T: Serialize>(
    engines: &Engines,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StageError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| StageError::fatal(format!("unserializable artifact: {}", e)))?;
    engines.blobs.put(key, bytes, Some(ttl)).await?;
    Ok(())
}
