//! # Procedural Engine
//!
//! A deterministic backend that derives expression frames from simple signal features instead
//! of a trained network. It keeps the service usable end to end (development, demos, tests)
//! and honours the full streaming-context contract, so a neural backend can replace it
//! without any change to the session protocol.
//!
//! ## How a frame is produced:
//! 1. The chunk is cut into one analysis window per output frame (`sample_rate / fps` samples)
//! 2. Each window yields a feature row: loudness, brightness (zero-crossing rate), onset, bias
//! 3. The feature matrix is multiplied by the style's projection matrix (features × channels)
//!    on the selected candle device and clamped to [0, 1]
//! 4. In streaming mode the first frames cross-fade from the previous chunk's last frame
//!
//! ## Status codes:
//! - `0`: success
//! - `1`: chunk too short for a single frame
//! - `2`: non-finite samples
//! - `3`: sample rate differs from the engine's

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tracing::{debug, warn};

use super::{ExpressionEngine, StreamingContext, StreamingOutput};
use crate::audio::AudioBuffer;
use crate::config::EngineConfig;
use crate::device::{create_device_from_string, DeviceManager};
use crate::expression::channels::*;
use crate::expression::{ControlFrame, CHANNEL_COUNT};

pub const STATUS_TOO_SHORT: i32 = 1;
pub const STATUS_INVALID_SAMPLES: i32 = 2;
pub const STATUS_RATE_MISMATCH: i32 = 3;

const FEATURE_COUNT: usize = 4;
const LOUDNESS: usize = 0;
const BRIGHTNESS: usize = 1;
const ONSET: usize = 2;
const BIAS: usize = 3;

/// RMS treated as full loudness.
const LOUD_RMS: f32 = 0.2;

/// Frames at the start of a chunk blended with the previous chunk's last frame.
const CROSSFADE_FRAMES: usize = 3;

pub struct ProceduralEngine {
    device: Device,
    sample_rate: u32,
    fps: f64,
    /// One (FEATURE_COUNT, CHANNEL_COUNT) projection per style.
    styles: Vec<Tensor>,
}

impl ProceduralEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if config.num_styles == 0 {
            return Err(anyhow!("Engine needs at least one style"));
        }

        let device = create_device_from_string(&config.device);
        let styles = (0..config.num_styles)
            .map(|style| {
                Tensor::from_vec(style_weights(style), (FEATURE_COUNT, CHANNEL_COUNT), &device)
                    .map_err(|e| anyhow!("Failed to build style {} projection: {}", style, e))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Procedural engine running on {}",
            DeviceManager::get_device_info(&device)
        );

        Ok(Self {
            device,
            sample_rate: config.sample_rate,
            fps: config.fps,
            styles,
        })
    }

    /// Human-readable label of the compute device.
    pub fn device_label(&self) -> String {
        DeviceManager::get_device_info(&self.device)
    }

    /// Number of frames `audio` yields: `floor(len / sample_rate * fps)`.
    pub fn frame_count(&self, audio: &AudioBuffer) -> usize {
        (audio.duration_seconds() * self.fps).floor() as usize
    }

    fn window_len(&self) -> usize {
        ((self.sample_rate as f64 / self.fps) as usize).max(1)
    }

    fn window<'a>(&self, samples: &'a [f32], frame: usize) -> &'a [f32] {
        let per_frame = self.sample_rate as f64 / self.fps;
        let start = ((frame as f64 * per_frame) as usize).min(samples.len());
        let end = (((frame + 1) as f64 * per_frame) as usize).min(samples.len());
        &samples[start..end]
    }

    /// Feature rows for every frame, plus the RMS of the last window.
    fn features(&self, audio: &AudioBuffer, context: Option<&StreamingContext>) -> (Vec<f32>, f32) {
        let frames = self.frame_count(audio);
        let samples = audio.samples();
        let mut rows = Vec::with_capacity(frames * FEATURE_COUNT);
        let mut previous_rms = context.and_then(|c| c.previous_volume()).unwrap_or(0.0);

        for t in 0..frames {
            let window = self.window(samples, t);
            let mut rms = rms(window);
            let mut zcr = zero_crossing_rate(window);

            // The first window of a follow-up chunk also sees the end of the previous one.
            if t == 0 {
                if let Some(tail) = context.and_then(|c| c.previous_audio()).filter(|a| !a.is_empty()) {
                    rms = 0.5 * (rms + self::rms(tail));
                    zcr = 0.5 * (zcr + zero_crossing_rate(tail));
                }
            }

            let mut row = [0.0f32; FEATURE_COUNT];
            row[LOUDNESS] = (rms / LOUD_RMS).min(1.0);
            row[BRIGHTNESS] = zcr;
            row[ONSET] = ((rms - previous_rms) / LOUD_RMS).clamp(0.0, 1.0);
            row[BIAS] = 1.0;
            rows.extend_from_slice(&row);
            previous_rms = rms;
        }

        (rows, previous_rms)
    }

    fn render(
        &self,
        audio: &AudioBuffer,
        style_index: usize,
        context: Option<&StreamingContext>,
    ) -> Result<(Vec<ControlFrame>, f32)> {
        let frame_count = self.frame_count(audio);
        let (rows, last_rms) = self.features(audio, context);
        let weights = &self.styles[style_index % self.styles.len()];

        let features = Tensor::from_vec(rows, (frame_count, FEATURE_COUNT), &self.device)?;
        let output = features.matmul(weights)?.clamp(0f32, 1f32)?;

        let mut frames = output
            .to_vec2::<f32>()?
            .into_iter()
            .map(|row| {
                ControlFrame::try_from(row.as_slice())
                    .map_err(|_| anyhow!("Engine produced {} channels, expected {}", row.len(), CHANNEL_COUNT))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(previous) = context.and_then(|c| c.previous_expression()) {
            crossfade_from(previous, &mut frames);
        }

        Ok((frames, last_rms))
    }
}

impl ExpressionEngine for ProceduralEngine {
    fn name(&self) -> &str {
        "procedural"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn num_styles(&self) -> usize {
        self.styles.len()
    }

    fn infer(&self, audio: &AudioBuffer, style_index: usize) -> Result<Vec<ControlFrame>> {
        if audio.sample_rate() != self.sample_rate {
            return Err(anyhow!(
                "Expected {} Hz audio, got {} Hz",
                self.sample_rate,
                audio.sample_rate()
            ));
        }
        if self.frame_count(audio) == 0 {
            return Err(anyhow!("Audio too short: {} samples", audio.len()));
        }
        if audio.samples().iter().any(|s| !s.is_finite()) {
            return Err(anyhow!("Audio contains non-finite samples"));
        }

        let (frames, _) = self.render(audio, style_index, None)?;
        Ok(frames)
    }

    fn infer_streaming(
        &self,
        audio: &AudioBuffer,
        context: StreamingContext,
    ) -> (Option<StreamingOutput>, StreamingContext) {
        if audio.sample_rate() != self.sample_rate {
            return (Some(StreamingOutput::failed(STATUS_RATE_MISMATCH)), context);
        }
        if audio.samples().iter().any(|s| !s.is_finite()) {
            return (Some(StreamingOutput::failed(STATUS_INVALID_SAMPLES)), context);
        }
        if self.frame_count(audio) == 0 {
            return (Some(StreamingOutput::failed(STATUS_TOO_SHORT)), context);
        }

        match self.render(audio, context.style_index(), Some(&context)) {
            Ok((frames, last_rms)) => {
                let next = context.advance(audio, self.window_len(), &frames, Some(last_rms));
                (Some(StreamingOutput::ok(frames)), next)
            }
            Err(e) => {
                warn!("Procedural engine failed: {}", e);
                (None, context)
            }
        }
    }
}

/// Blend the first frames from `previous` toward the new values.
fn crossfade_from(previous: &ControlFrame, frames: &mut [ControlFrame]) {
    for (k, frame) in frames.iter_mut().take(CROSSFADE_FRAMES).enumerate() {
        let t = (k + 1) as f32 / (CROSSFADE_FRAMES + 1) as f32;
        for (w, p) in frame.iter_mut().zip(previous) {
            *w = p + (*w - p) * t;
        }
    }
}

fn rms(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f32 = window.iter().map(|s| s * s).sum();
    (sum / window.len() as f32).sqrt()
}

fn zero_crossing_rate(window: &[f32]) -> f32 {
    if window.len() < 2 {
        return 0.0;
    }
    let crossings = window
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / (window.len() - 1) as f32
}

/// Projection matrix for `style`, row-major (FEATURE_COUNT, CHANNEL_COUNT).
///
/// Every style shares the same articulation map; styles differ by a smooth per-channel gain
/// and a slightly different resting pose.
fn style_weights(style: usize) -> Vec<f32> {
    let mut w = vec![0.0f32; FEATURE_COUNT * CHANNEL_COUNT];
    let mut set = |feature: usize, channel: usize, value: f32| {
        w[feature * CHANNEL_COUNT + channel] = value;
    };

    set(LOUDNESS, JAW_OPEN, 0.7);
    set(LOUDNESS, MOUTH_LOWER_DOWN_LEFT, 0.4);
    set(LOUDNESS, MOUTH_LOWER_DOWN_RIGHT, 0.4);
    set(LOUDNESS, MOUTH_UPPER_UP_LEFT, 0.25);
    set(LOUDNESS, MOUTH_UPPER_UP_RIGHT, 0.25);
    set(LOUDNESS, MOUTH_FUNNEL, 0.15);
    set(LOUDNESS, MOUTH_STRETCH_LEFT, 0.2);
    set(LOUDNESS, MOUTH_STRETCH_RIGHT, 0.2);

    set(BRIGHTNESS, MOUTH_STRETCH_LEFT, 0.3);
    set(BRIGHTNESS, MOUTH_STRETCH_RIGHT, 0.3);
    set(BRIGHTNESS, MOUTH_PUCKER, -0.2);
    set(BRIGHTNESS, MOUTH_FUNNEL, -0.1);

    set(ONSET, BROW_INNER_UP, 0.2);
    set(ONSET, JAW_OPEN, 0.1);

    set(BIAS, MOUTH_CLOSE, 0.05);
    set(BIAS, EYE_BLINK_LEFT, 0.05);
    set(BIAS, EYE_BLINK_RIGHT, 0.05);
    set(BIAS, MOUTH_PUCKER, 0.05 + 0.02 * (style % 3) as f32);

    let phase = style as f32 * 1.7;
    for feature in [LOUDNESS, BRIGHTNESS, ONSET] {
        for channel in 0..CHANNEL_COUNT {
            let gain = 1.0 + 0.15 * (phase + channel as f32).sin();
            w[feature * CHANNEL_COUNT + channel] *= gain;
        }
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engine::STATUS_OK;
    use crate::expression::frames_in_bounds;

    fn engine() -> ProceduralEngine {
        let mut config = AppConfig::default().engine;
        config.device = "cpu".to_string();
        ProceduralEngine::new(&config).unwrap()
    }

    fn tone(seconds: f64, amplitude: f32) -> AudioBuffer {
        let n = (16000.0 * seconds) as usize;
        let samples = (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin())
            .collect();
        AudioBuffer::new(samples, 16000)
    }

    #[test]
    fn test_frame_count_and_bounds() {
        let engine = engine();
        let frames = engine.infer(&tone(1.5, 0.5), 0).unwrap();
        assert_eq!(frames.len(), 45);
        assert!(frames_in_bounds(&frames));
    }

    #[test]
    fn test_loudness_opens_jaw() {
        let engine = engine();
        let loud = engine.infer(&tone(1.0, 0.5), 0).unwrap();
        let silent = engine.infer(&AudioBuffer::new(vec![0.0; 16000], 16000), 0).unwrap();
        assert!(loud[15][JAW_OPEN] > 0.5);
        assert!(silent[15][JAW_OPEN] < 0.01);
    }

    #[test]
    fn test_styles_differ_and_are_deterministic() {
        let engine = engine();
        let audio = tone(0.5, 0.3);
        let a = engine.infer(&audio, 0).unwrap();
        let b = engine.infer(&audio, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, engine.infer(&audio, 0).unwrap());
    }

    #[test]
    fn test_streaming_advances_context() {
        let engine = engine();
        let (output, context) = engine.infer_streaming(&tone(1.0, 0.5), StreamingContext::initial(2));
        let output = output.unwrap();
        assert_eq!(output.code, STATUS_OK);
        assert_eq!(output.expression.as_ref().map(|f| f.len()), Some(30));
        assert!(!context.is_initial());
        assert_eq!(context.style_index(), 2);
        assert!(context.previous_expression().is_some());
    }

    #[test]
    fn test_streaming_continuity_across_chunks() {
        let engine = engine();
        let silence = AudioBuffer::new(vec![0.0; 16000], 16000);

        let (_, after_speech) = engine.infer_streaming(&tone(1.0, 0.5), StreamingContext::initial(0));
        let (carried, _) = engine.infer_streaming(&silence, after_speech);
        let (fresh, _) = engine.infer_streaming(&silence, StreamingContext::initial(0));

        let carried = carried.unwrap().expression.unwrap();
        let fresh = fresh.unwrap().expression.unwrap();
        // the first frame of a follow-up chunk starts near where the last chunk ended
        assert!(carried[0][JAW_OPEN] > fresh[0][JAW_OPEN] + 0.2);
        // and settles to the same values once the cross-fade is over
        assert!((carried[10][JAW_OPEN] - fresh[10][JAW_OPEN]).abs() < 1e-6);
    }

    #[test]
    fn test_streaming_failures_keep_context() {
        let engine = engine();
        let context = StreamingContext::initial(0);

        let (output, returned) =
            engine.infer_streaming(&AudioBuffer::new(vec![0.1; 100], 16000), context.clone());
        assert_eq!(output.unwrap().code, STATUS_TOO_SHORT);
        assert_eq!(returned, context);

        let (output, returned) =
            engine.infer_streaming(&AudioBuffer::new(vec![0.1; 16000], 8000), context.clone());
        assert_eq!(output.unwrap().code, STATUS_RATE_MISMATCH);
        assert_eq!(returned, context);

        let (output, _) =
            engine.infer_streaming(&AudioBuffer::new(vec![f32::NAN; 16000], 16000), context);
        assert_eq!(output.unwrap().code, STATUS_INVALID_SAMPLES);
    }

    #[test]
    fn test_oneshot_rejects_empty_audio() {
        let engine = engine();
        assert!(engine.infer(&AudioBuffer::new(Vec::new(), 16000), 0).is_err());
    }
}
