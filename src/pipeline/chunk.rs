//! Streaming chunk flow.
//!
//! ```text
//! lock session -> decode -> truncate -> length check -> engine -> output check
//!              -> commit -> post-process -> encode
//! ```
//!
//! The session lock is held from the first step to the commit. Every failure before the commit
//! drops the guard, so the session keeps its previous context and chunk count.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{call_engine, decode_upload, finish};
use crate::audio::{volume_envelope, AudioUpload};
use crate::codec::ExpressionPayload;
use crate::config::AppConfig;
use crate::engine::{ExpressionEngine, STATUS_OK};
use crate::error::{AppError, AppResult};
use crate::postprocess::PostProcessOptions;
use crate::session::SessionStore;

/// One chunk as received from the client.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub session_id: String,
    pub upload: AudioUpload,
    pub options: PostProcessOptions,
}

/// Run one chunk of a streaming session.
pub async fn process_chunk(
    store: &SessionStore,
    engine: Arc<dyn ExpressionEngine>,
    config: &AppConfig,
    request: ChunkRequest,
) -> AppResult<ExpressionPayload> {
    let start = Instant::now();
    let ChunkRequest {
        session_id,
        upload,
        options,
    } = request;

    let guard = store.lock(&session_id).await?;
    debug!(
        session_id = guard.session_id(),
        style_index = guard.style_index(),
        previous_chunks = guard.chunk_count(),
        "Session locked"
    );

    let audio = decode_upload(upload, engine.sample_rate()).await?;

    let max_samples = audio.samples_for(config.streaming.max_chunk_seconds);
    if audio.len() > max_samples {
        debug!(%session_id, samples = audio.len(), max_samples, "Truncating long chunk");
    }
    let audio = audio.truncated(max_samples);

    let min_samples = audio.samples_for(config.streaming.min_chunk_seconds);
    if audio.len() < min_samples {
        return Err(AppError::AudioTooShort(format!(
            "Audio chunk too short: {} samples, minimum {} samples required",
            audio.len(),
            min_samples
        )));
    }

    let context = guard.context().clone();
    let timeout = Duration::from_secs(config.engine.timeout_secs);
    let worker = Arc::clone(&engine);
    let ((output, next_context), audio) = call_engine(timeout, move || {
        let result = worker.infer_streaming(&audio, context);
        (result, audio)
    })
    .await?;

    let output = match output {
        Some(output) if output.code == STATUS_OK => output,
        Some(output) => {
            warn!(%session_id, code = output.code, "Streaming inference failed");
            return Err(AppError::EngineFailure(format!(
                "Inference failed with code: {}",
                output.code
            )));
        }
        None => {
            warn!(%session_id, "Streaming inference returned no output");
            return Err(AppError::EngineFailure(
                "Inference failed with code: None".to_string(),
            ));
        }
    };
    let frames = output.expression.ok_or_else(|| {
        AppError::EngineFailure("Inference returned no expression data".to_string())
    })?;

    let chunk_index = guard.commit(next_context);

    let fps = engine.fps();
    let volume = volume_envelope(&audio, fps);
    let frame_count = frames.len();
    let payload = finish(frames, volume, options, config, fps)
        .with_metadata("session_id", session_id.clone())
        .with_metadata("chunk_index", chunk_index)
        .with_metadata("inference_time", start.elapsed().as_secs_f64())
        .with_metadata("audio_length", audio.duration_seconds());

    info!(
        %session_id,
        chunk_index,
        frame_count,
        audio_seconds = audio.duration_seconds(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Chunk processed"
    );

    Ok(payload)
}
