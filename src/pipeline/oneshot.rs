//! Whole-clip flow: optional vocal isolation, decode, infer, post-process, encode.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::{call_engine, decode_upload, finish};
use crate::audio::{volume_envelope, AudioUpload, VocalIsolator};
use crate::codec::ExpressionPayload;
use crate::config::AppConfig;
use crate::engine::ExpressionEngine;
use crate::error::{AppError, AppResult};
use crate::postprocess::PostProcessOptions;

/// A whole-clip inference request.
#[derive(Debug, Clone)]
pub struct OneShotRequest {
    pub upload: AudioUpload,
    pub style_index: usize,
    /// Run vocal isolation before inference (`extract_vocal` / `ex_vol`).
    pub extract_vocal: bool,
    pub options: PostProcessOptions,
}

pub async fn process_oneshot(
    engine: Arc<dyn ExpressionEngine>,
    isolator: Option<Arc<dyn VocalIsolator>>,
    config: &AppConfig,
    request: OneShotRequest,
) -> AppResult<ExpressionPayload> {
    let start = Instant::now();
    let OneShotRequest {
        upload,
        style_index,
        extract_vocal,
        options,
    } = request;

    if style_index >= engine.num_styles() {
        return Err(AppError::InvalidRequest(format!(
            "id_idx {} out of range, engine has {} styles",
            style_index,
            engine.num_styles()
        )));
    }

    let upload = if extract_vocal {
        match isolator {
            Some(isolator) => isolate_or_fallback(isolator, upload).await,
            None => {
                warn!("Vocal isolation requested but not configured, using original audio");
                upload
            }
        }
    } else {
        upload
    };

    let audio = decode_upload(upload, engine.sample_rate()).await?;

    let timeout = Duration::from_secs(config.engine.timeout_secs);
    let worker = Arc::clone(&engine);
    let (result, audio) = call_engine(timeout, move || {
        let result = worker.infer(&audio, style_index);
        (result, audio)
    })
    .await?;

    let frames = result.map_err(|e| AppError::EngineFailure(format!("Inference failed: {}", e)))?;
    if frames.is_empty() {
        return Err(AppError::EngineFailure(
            "Inference returned no expression data".to_string(),
        ));
    }

    let fps = engine.fps();
    let volume = volume_envelope(&audio, fps);
    let frame_count = frames.len();
    let payload = finish(frames, volume, options, config, fps)
        .with_metadata("inference_time", start.elapsed().as_secs_f64())
        .with_metadata("audio_length", audio.duration_seconds());

    info!(
        style_index,
        frame_count,
        audio_seconds = audio.duration_seconds(),
        extract_vocal,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "One-shot inference completed"
    );

    Ok(payload)
}

/// Replace the upload with its isolated vocal track, or return it unchanged if isolation fails.
async fn isolate_or_fallback(isolator: Arc<dyn VocalIsolator>, upload: AudioUpload) -> AudioUpload {
    let original = Arc::new(upload);
    let input = Arc::clone(&original);
    let task = tokio::task::spawn_blocking(move || isolate_upload(isolator.as_ref(), &input));

    let isolated = match task.await {
        Ok(isolated) => isolated,
        Err(e) => {
            warn!("Vocal isolation task failed, using original audio: {}", e);
            None
        }
    };

    isolated.unwrap_or_else(|| Arc::try_unwrap(original).unwrap_or_else(|shared| (*shared).clone()))
}

/// Spill the upload to a temporary file, isolate, read the result back.
///
/// The temporary input file and the isolator's output directory are removed when this returns.
fn isolate_upload(isolator: &dyn VocalIsolator, upload: &AudioUpload) -> Option<AudioUpload> {
    let suffix = upload
        .extension()
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".wav".to_string());

    let mut input = match tempfile::Builder::new().suffix(&suffix).tempfile() {
        Ok(file) => file,
        Err(e) => {
            warn!("Vocal isolation skipped, cannot create temporary file: {}", e);
            return None;
        }
    };
    if let Err(e) = write_all(&mut input, &upload.bytes) {
        warn!("Vocal isolation skipped, cannot write temporary file: {}", e);
        return None;
    }

    let track = isolator.isolate(input.path())?;
    match std::fs::read(track.path()) {
        Ok(bytes) if !bytes.is_empty() => {
            let filename = track
                .path()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());
            let mut isolated = AudioUpload::new(bytes);
            isolated.filename = filename;
            info!("Using isolated vocal track");
            Some(isolated)
        }
        Ok(_) => {
            warn!("Vocal isolation produced an empty file, using original audio");
            None
        }
        Err(e) => {
            warn!("Cannot read isolated vocal track, using original audio: {}", e);
            None
        }
    }
}

fn write_all(file: &mut NamedTempFile, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::encode_wav;
    use crate::audio::IsolatedTrack;
    use crate::pipeline::test_support::{pcm_tone, StubBehavior, StubEngine};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn request(seconds: f64) -> OneShotRequest {
        OneShotRequest {
            upload: AudioUpload::new(pcm_tone(seconds)).with_filename("clip.pcm"),
            style_index: 0,
            extract_vocal: false,
            options: PostProcessOptions::default(),
        }
    }

    /// Isolator that writes a fixed-length silent WAV, or fails.
    struct FakeIsolator {
        output_seconds: Option<f64>,
        calls: AtomicUsize,
        inputs: Mutex<Vec<std::path::PathBuf>>,
    }

    impl FakeIsolator {
        fn new(output_seconds: Option<f64>) -> Self {
            Self {
                output_seconds,
                calls: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
            }
        }
    }

    impl VocalIsolator for FakeIsolator {
        fn isolate(&self, input: &Path) -> Option<IsolatedTrack> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(input.exists());
            self.inputs.lock().unwrap().push(input.to_path_buf());

            let seconds = self.output_seconds?;
            let dir = tempfile::TempDir::new().ok()?;
            let path = dir.path().join("vocals.wav");
            let samples = vec![0.0f32; (16000.0 * seconds) as usize];
            std::fs::write(&path, encode_wav(&samples, 16000)).ok()?;
            Some(IsolatedTrack::new(path, dir))
        }
    }

    #[tokio::test]
    async fn test_oneshot_frames_and_metadata() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let payload = process_oneshot(engine, None, &AppConfig::default(), request(1.5))
            .await
            .unwrap();

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["metadata"]["frame_count"], 45);
        assert_eq!(value["metadata"]["audio_length"], 1.5);
        assert!(value["metadata"]["inference_time"].is_number());
        assert!(value["metadata"].get("session_id").is_none());
    }

    #[tokio::test]
    async fn test_style_index_out_of_range() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let mut req = request(1.0);
        req.style_index = 99;
        let err = process_oneshot(engine.clone(), None, &AppConfig::default(), req)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_error_and_empty_output() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Code(1)));
        let err = process_oneshot(engine, None, &AppConfig::default(), request(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EngineFailure(_)));

        let engine = Arc::new(StubEngine::new(StubBehavior::NoExpression));
        let err = process_oneshot(engine, None, &AppConfig::default(), request(1.0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Inference returned no expression data");
    }

    #[tokio::test]
    async fn test_isolated_track_is_used() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let isolator = Arc::new(FakeIsolator::new(Some(0.5)));
        let mut req = request(1.5);
        req.extract_vocal = true;

        let payload = process_oneshot(engine, Some(isolator.clone()), &AppConfig::default(), req)
            .await
            .unwrap();
        // 0.5 s isolated track instead of the 1.5 s original
        assert_eq!(payload.frames.len(), 15);
        assert_eq!(isolator.calls.load(Ordering::SeqCst), 1);

        // the spilled input was cleaned up
        let inputs = isolator.inputs.lock().unwrap();
        assert!(inputs.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_isolation_failure_falls_back() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let isolator = Arc::new(FakeIsolator::new(None));
        let mut req = request(1.5);
        req.extract_vocal = true;

        let payload = process_oneshot(engine, Some(isolator.clone()), &AppConfig::default(), req)
            .await
            .unwrap();
        assert_eq!(payload.frames.len(), 45);
        assert_eq!(isolator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_isolation_not_requested() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let isolator = Arc::new(FakeIsolator::new(Some(0.5)));

        let payload = process_oneshot(engine, Some(isolator.clone()), &AppConfig::default(), request(1.0))
            .await
            .unwrap();
        assert_eq!(payload.frames.len(), 30);
        assert_eq!(isolator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wav_upload() {
        let engine = Arc::new(StubEngine::new(StubBehavior::Frames));
        let samples = vec![0.1f32; 32000];
        let req = OneShotRequest {
            upload: AudioUpload::new(encode_wav(&samples, 16000)).with_filename("clip.wav"),
            style_index: 1,
            extract_vocal: false,
            options: PostProcessOptions {
                movement_smooth: true,
                brow_movement: false,
            },
        };

        let payload = process_oneshot(engine, None, &AppConfig::default(), req)
            .await
            .unwrap();
        assert_eq!(payload.frames.len(), 60);
    }
}
