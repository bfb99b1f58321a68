//! # Post-Processing Module
//!
//! Two corrective passes over an engine's control sequence, both driven by the volume envelope
//! of the audio that produced it:
//!
//! - **Mouth smoothing**: removes frame-to-frame jitter and relaxes the mouth during silence
//! - **Brow movement**: adds small, loudness-correlated brow raises to otherwise static channels
//!
//! Both passes are opt-in per request and never change the frame count or channel layout.
//! [`clamp_frames`] runs after them unconditionally, so every encoded weight lies in [0, 1].

pub mod secondary_motion;  // Volume-driven brow motion
pub mod smoothing;         // Mouth channel smoothing and silence damping

use std::ops::Range;

pub use secondary_motion::{apply_brow_movement, brow_rng, BrowSettings};
pub use smoothing::{smooth_mouth_movements, SmoothingSettings};

use crate::audio::VolumeEnvelope;
use crate::config::PostProcessConfig;
use crate::expression::{frames_in_bounds, ControlFrame};

/// Per-request toggles, read from the `movement_smooth` and `brow_movement` form fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessOptions {
    pub movement_smooth: bool,
    pub brow_movement: bool,
}

/// Run the enabled passes, then clamp.
///
/// `volume` must already be aligned to `frames` (see `VolumeEnvelope::truncated`).
pub fn run(
    frames: Vec<ControlFrame>,
    volume: &VolumeEnvelope,
    options: PostProcessOptions,
    config: &PostProcessConfig,
) -> Vec<ControlFrame> {
    let mut frames = if options.movement_smooth {
        smooth_mouth_movements(&frames, volume, &config.smoothing)
    } else {
        frames
    };

    if options.brow_movement {
        let mut rng = brow_rng(config.brow_seed);
        frames = apply_brow_movement(&frames, volume, &config.brow, &mut rng);
    }

    clamp_frames(&mut frames);
    debug_assert!(frames_in_bounds(&frames));
    frames
}

/// Clamp every weight to [0, 1]; NaN and infinities become 0.
pub fn clamp_frames(frames: &mut [ControlFrame]) {
    for weight in frames.iter_mut().flat_map(|frame| frame.iter_mut()) {
        *weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

/// Maximal runs of consecutive frames for which `predicate` holds, at least `min_len` long.
pub(crate) fn runs_where(
    len: usize,
    min_len: usize,
    predicate: impl Fn(usize) -> bool,
) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = None;

    for i in 0..=len {
        let inside = i < len && predicate(i);
        match (inside, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= min_len.max(1) {
                    runs.push(s..i);
                }
                start = None;
            }
            _ => {}
        }
    }

    runs
}
