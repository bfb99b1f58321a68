//! # Inference Engine
//!
//! The engine maps audio to a sequence of control frames. The rest of the service only sees it
//! through the [`ExpressionEngine`] trait, so the bundled backend can be replaced by a neural one
//! without touching the session protocol.
//!
//! ## Key Components:
//! - **ExpressionEngine**: the trait every backend implements
//! - **StreamingContext**: state carried from one chunk to the next inside a session
//! - **StreamingOutput**: status code plus frames from a streaming call
//! - **ProceduralEngine**: built-in, signal-driven backend running on candle tensors
//!
//! ## Threading:
//! Engine calls are synchronous and CPU-bound. Callers run them on tokio's blocking pool
//! (see `pipeline::call_engine`), which is why the trait requires `Send + Sync`.

pub mod procedural;  // Built-in signal-driven backend

pub use procedural::ProceduralEngine;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::audio::AudioBuffer;
use crate::config::{EngineBackend, EngineConfig};
use crate::expression::ControlFrame;

/// Status code of a successful streaming call.
pub const STATUS_OK: i32 = 0;

/// An audio-to-expression backend.
pub trait ExpressionEngine: Send + Sync {
    /// Human-readable backend name, reported by `/health`.
    fn name(&self) -> &str;

    /// Sample rate the engine expects its input at.
    fn sample_rate(&self) -> u32;

    /// Output frame rate.
    fn fps(&self) -> f64;

    /// Number of selectable speaking styles.
    fn num_styles(&self) -> usize;

    /// Whole-clip inference with no carried state.
    fn infer(&self, audio: &AudioBuffer, style_index: usize) -> Result<Vec<ControlFrame>>;

    /// Chunk inference inside a session.
    ///
    /// Returns the output (or `None` if the engine produced nothing) together with the context to
    /// pass to the next chunk. On a failed call the returned context is ignored by the caller.
    fn infer_streaming(
        &self,
        audio: &AudioBuffer,
        context: StreamingContext,
    ) -> (Option<StreamingOutput>, StreamingContext);
}

/// Result of one streaming call.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingOutput {
    /// `STATUS_OK` on success, engine-specific otherwise.
    pub code: i32,
    pub expression: Option<Vec<ControlFrame>>,
}

impl StreamingOutput {
    pub fn ok(frames: Vec<ControlFrame>) -> Self {
        Self {
            code: STATUS_OK,
            expression: Some(frames),
        }
    }

    pub fn failed(code: i32) -> Self {
        Self {
            code,
            expression: None,
        }
    }
}

/// State carried across chunk boundaries of one session.
///
/// Opaque outside this module: the protocol layer can create the initial context and hand
/// contexts back and forth, but only engines look inside or derive a follow-up context.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingContext {
    is_initial_input: bool,
    previous_audio: Option<Vec<f32>>,
    previous_expression: Option<ControlFrame>,
    previous_volume: Option<f32>,
    previous_headpose: Option<[f32; 3]>,
    style_index: usize,
}

impl StreamingContext {
    /// The "no prior state" context a new session starts with.
    pub fn initial(style_index: usize) -> Self {
        Self {
            is_initial_input: true,
            previous_audio: None,
            previous_expression: None,
            previous_volume: None,
            previous_headpose: None,
            style_index,
        }
    }

    pub fn is_initial(&self) -> bool {
        self.is_initial_input
    }

    pub fn style_index(&self) -> usize {
        self.style_index
    }

    /// Context following a chunk that consumed `audio` and produced `frames`.
    ///
    /// Keeps the last `tail_samples` of audio, the last frame and the last volume sample.
    /// Head pose is carried through unchanged.
    pub fn advance(
        &self,
        audio: &AudioBuffer,
        tail_samples: usize,
        frames: &[ControlFrame],
        volume: Option<f32>,
    ) -> Self {
        Self {
            is_initial_input: false,
            previous_audio: Some(audio.tail(tail_samples).to_vec()),
            previous_expression: frames.last().copied().or(self.previous_expression),
            previous_volume: volume.or(self.previous_volume),
            previous_headpose: self.previous_headpose,
            style_index: self.style_index,
        }
    }

    pub(crate) fn previous_audio(&self) -> Option<&[f32]> {
        self.previous_audio.as_deref()
    }

    pub(crate) fn previous_expression(&self) -> Option<&ControlFrame> {
        self.previous_expression.as_ref()
    }

    pub(crate) fn previous_volume(&self) -> Option<f32> {
        self.previous_volume
    }
}

/// Build the configured backend; `None` for the disabled backend.
pub fn build_engine(config: &EngineConfig) -> Result<Option<Arc<dyn ExpressionEngine>>> {
    match config.backend {
        EngineBackend::Procedural => {
            let engine = ProceduralEngine::new(config)?;
            info!(
                "Loaded {} engine on {} ({} styles, {} Hz, {} fps)",
                engine.name(),
                engine.device_label(),
                engine.num_styles(),
                engine.sample_rate(),
                engine.fps()
            );
            Ok(Some(Arc::new(engine)))
        }
        EngineBackend::Disabled => {
            info!("Inference engine disabled by configuration");
            Ok(None)
        }
    }
}
