//! Mouth channel smoothing.
//!
//! Two steps over the mouth group (jaw and mouth channels):
//! 1. a centered moving average, which removes single-frame jitter;
//! 2. silence damping: during long enough quiet stretches the mouth is pulled toward rest,
//!    with linear cross-fades at both edges of each stretch.
//!
//! Every output weight is a convex combination of input weights and 0, so values that
//! started in [0, 1] stay there.

use serde::{Deserialize, Serialize};

use super::runs_where;
use crate::audio::VolumeEnvelope;
use crate::expression::channels::MOUTH_CHANNELS;
use crate::expression::ControlFrame;

/// Tuning for [`smooth_mouth_movements`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmoothingSettings {
    /// Moving-average width in frames (odd widths are symmetric).
    pub window: usize,
    /// RMS below which a frame counts as silent.
    pub silence_threshold: f32,
    /// Shortest quiet stretch that gets damped.
    pub min_silence_frames: usize,
    /// Mouth weight multiplier inside a quiet stretch, in [0, 1].
    pub silence_damping: f32,
    /// Cross-fade length at each edge of a quiet stretch.
    pub blend_window: usize,
}

impl Default for SmoothingSettings {
    fn default() -> Self {
        Self {
            window: 3,
            silence_threshold: 0.01,
            min_silence_frames: 5,
            silence_damping: 0.2,
            blend_window: 3,
        }
    }
}

impl SmoothingSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.window == 0 {
            return Err("window must be at least 1".to_string());
        }
        if !(self.silence_threshold >= 0.0) {
            return Err("silence_threshold must be non-negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.silence_damping) {
            return Err("silence_damping must be within [0, 1]".to_string());
        }
        Ok(())
    }
}

/// Smooth the mouth channels of `frames`.
///
/// Frames past the end of `volume` count as silent. Non-mouth channels are copied unchanged.
pub fn smooth_mouth_movements(
    frames: &[ControlFrame],
    volume: &VolumeEnvelope,
    settings: &SmoothingSettings,
) -> Vec<ControlFrame> {
    let mut smoothed = moving_average(frames, settings.window.max(1));

    let quiet = runs_where(frames.len(), settings.min_silence_frames, |i| {
        volume.at(i) < settings.silence_threshold
    });

    for run in quiet {
        let len = run.len();
        for (offset, frame) in smoothed[run].iter_mut().enumerate() {
            let weight = edge_ramp(offset, len, settings.blend_window);
            let gain = 1.0 - weight * (1.0 - settings.silence_damping);
            for channel in MOUTH_CHANNELS {
                frame[channel] *= gain;
            }
        }
    }

    smoothed
}

fn moving_average(frames: &[ControlFrame], window: usize) -> Vec<ControlFrame> {
    let before = (window - 1) / 2;
    let after = window - 1 - before;

    (0..frames.len())
        .map(|i| {
            let mut frame = frames[i];
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(frames.len());
            let count = (hi - lo) as f32;
            for channel in MOUTH_CHANNELS {
                let sum: f32 = frames[lo..hi].iter().map(|f| f[channel]).sum();
                frame[channel] = sum / count;
            }
            frame
        })
        .collect()
}

/// Damping weight in [0, 1] for position `offset` of a run of `len` frames: ramps up over
/// the first `blend` frames, down over the last `blend`, 1 in between.
fn edge_ramp(offset: usize, len: usize, blend: usize) -> f32 {
    if blend == 0 {
        return 1.0;
    }
    let from_start = offset + 1;
    let from_end = len - offset;
    let distance = from_start.min(from_end);
    if distance > blend {
        1.0
    } else {
        distance as f32 / (blend + 1) as f32
    }
}
