//! # Inference Pipelines
//!
//! The two request flows of the service:
//! - **chunk**: one audio chunk inside a streaming session (context in, context out)
//! - **oneshot**: a whole clip, no session
//!
//! Both end in the same post-processing and encoding steps. Decoding and engine calls are CPU
//! bound and run on tokio's blocking pool; engine calls are additionally bounded by the
//! configured timeout.

pub mod chunk;    // Streaming chunk flow
pub mod oneshot;  // Whole-clip flow

pub use chunk::{process_chunk, ChunkRequest};
pub use oneshot::{process_oneshot, OneShotRequest};

use std::time::Duration;
use tracing::debug;

use crate::audio::{decode, AudioBuffer, AudioUpload, VolumeEnvelope};
use crate::codec::{self, ExpressionPayload};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::expression::ControlFrame;
use crate::postprocess::{self, PostProcessOptions};

/// Run an engine call on the blocking pool, bounded by `timeout`.
///
/// If the caller stops waiting (timeout or dropped request) the blocking task still runs to
/// completion, but its result is discarded.
pub async fn call_engine<T, F>(timeout: Duration, task: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(task)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::EngineFailure(format!("Inference task failed: {}", e))),
        Err(_) => Err(AppError::EngineFailure(format!(
            "Inference timed out after {}s",
            timeout.as_secs_f64()
        ))),
    }
}

/// Decode an upload on the blocking pool.
pub async fn decode_upload(upload: AudioUpload, target_rate: u32) -> AppResult<AudioBuffer> {
    tokio::task::spawn_blocking(move || decode(&upload, target_rate))
        .await
        .map_err(|e| AppError::Internal(format!("Decode task failed: {}", e)))?
        .map_err(AppError::from)
}

/// Shared tail of both pipelines: post-process, clamp, encode.
pub(crate) fn finish(
    frames: Vec<ControlFrame>,
    volume: VolumeEnvelope,
    options: PostProcessOptions,
    config: &AppConfig,
    fps: f64,
) -> ExpressionPayload {
    let volume = volume.truncated(frames.len());
    if volume.len() < frames.len() {
        debug!(
            frames = frames.len(),
            volume_frames = volume.len(),
            "Volume envelope shorter than the expression sequence, tail treated as silence"
        );
    }
    let frames = postprocess::run(frames, &volume, options, &config.postprocess);
    codec::encode(&frames, fps)
}
