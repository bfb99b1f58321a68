//! # Output Codec
//!
//! Serializes a control sequence into the self-describing JSON payload returned by every
//! inference endpoint:
//!
//! ```json
//! {
//!   "names": ["eyeBlinkLeft", "..."],
//!   "metadata": { "fps": 30.0, "frame_count": 45, "blendshape_count": 52, "chunk_index": 1 },
//!   "frames": [ { "weights": [0.0, "..."], "time": 0.0, "rotation": [] } ]
//! }
//! ```
//!
//! ## Timestamps:
//! Frame `i` is stamped `i / fps`, computed from the index. Summing `1 / fps` frame after frame
//! would drift on long sequences.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::expression::{ControlFrame, BLENDSHAPE_NAMES, CHANNEL_COUNT};

/// Encoded control sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionPayload {
    pub names: &'static [&'static str],
    pub metadata: PayloadMetadata,
    pub frames: Vec<PayloadFrame>,
}

/// Fixed metadata plus caller-supplied annotations, flattened into one JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadMetadata {
    pub fps: f64,
    pub frame_count: usize,
    pub blendshape_count: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadFrame {
    pub weights: Vec<f32>,
    pub time: f64,
    /// Head rotation; not produced by the current engines, always empty.
    pub rotation: Vec<f32>,
}

impl ExpressionPayload {
    /// Attach an extra metadata entry (session id, chunk index, timings...).
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Encode `frames` sampled at `fps`.
pub fn encode(frames: &[ControlFrame], fps: f64) -> ExpressionPayload {
    let frames: Vec<PayloadFrame> = frames
        .iter()
        .enumerate()
        .map(|(i, frame)| PayloadFrame {
            weights: frame.to_vec(),
            time: i as f64 / fps,
            rotation: Vec::new(),
        })
        .collect();

    ExpressionPayload {
        names: &BLENDSHAPE_NAMES,
        metadata: PayloadMetadata {
            fps,
            frame_count: frames.len(),
            blendshape_count: CHANNEL_COUNT,
            extra: Map::new(),
        },
        frames,
    }
}
