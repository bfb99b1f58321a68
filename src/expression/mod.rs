//! # Expression Data Model
//!
//! Control values produced by the engine: one fixed-size frame of blendshape weights per
//! output time step. The channel layout is shared by the engine, the post-processing passes
//! and the output codec, so it lives in one immutable table (`channels`).

pub mod channels;

pub use channels::{BLENDSHAPE_NAMES, CHANNEL_COUNT};

/// One output time step: a weight per named channel, ordered by `BLENDSHAPE_NAMES`.
///
/// ## Invariant:
/// Every weight is meant to lie in [0, 1]. The array length encodes the cardinality,
/// so a frame with a missing or extra channel cannot be constructed.
pub type ControlFrame = [f32; CHANNEL_COUNT];

/// A frame with every channel at rest.
pub const NEUTRAL_FRAME: ControlFrame = [0.0; CHANNEL_COUNT];

/// Check that every weight of every frame lies in [0, 1].
pub fn frames_in_bounds(frames: &[ControlFrame]) -> bool {
    frames
        .iter()
        .all(|frame| frame.iter().all(|w| (0.0..=1.0).contains(w)))
}
