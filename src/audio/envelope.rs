//! # Volume Envelope
//!
//! Frame-rate aligned loudness: one RMS value per output video frame. The post-processing
//! passes use it to tell speech from silence and to scale synthesized motion.

use crate::audio::buffer::AudioBuffer;

/// Non-negative RMS samples, one per output frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeEnvelope {
    samples: Vec<f32>,
}

impl VolumeEnvelope {
    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Volume at frame `index`; frames past the end of the envelope count as silence.
    pub fn at(&self, index: usize) -> f32 {
        self.samples.get(index).copied().unwrap_or(0.0)
    }

    /// Align to a control sequence of `frame_count` frames.
    ///
    /// The engine's frame count is authoritative: a longer envelope is cut, a shorter one is
    /// left as is (never padded).
    pub fn truncated(mut self, frame_count: usize) -> Self {
        self.samples.truncate(frame_count);
        self
    }
}

/// Compute the centered RMS envelope of `audio` at `fps` frames per second.
///
/// ## Windowing:
/// - window length and hop are both `floor(sample_rate / fps)` samples
/// - the signal is zero padded by half a window on each side, so frame `t` is centered on
///   sample `t * hop`
/// - the result has `1 + (len + 2 * (window / 2) - window) / hop` samples
pub fn volume_envelope(audio: &AudioBuffer, fps: f64) -> VolumeEnvelope {
    let samples = audio.samples();
    if fps <= 0.0 || samples.is_empty() {
        return VolumeEnvelope::default();
    }

    let window = (audio.sample_rate() as f64 / fps) as usize;
    if window == 0 {
        return VolumeEnvelope::default();
    }
    let hop = window;
    let pad = window / 2;
    let padded_len = samples.len() + 2 * pad;
    if padded_len < window {
        return VolumeEnvelope::default();
    }
    let frames = 1 + (padded_len - window) / hop;

    let envelope = (0..frames)
        .map(|t| {
            // Window covers padded positions [t*hop, t*hop + window); padding contributes zeros.
            let start = (t * hop).saturating_sub(pad);
            let end = (t * hop + window).saturating_sub(pad).min(samples.len());
            let energy: f64 = samples[start.min(end)..end]
                .iter()
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            (energy / window as f64).sqrt() as f32
        })
        .collect();

    VolumeEnvelope::from_samples(envelope)
}
