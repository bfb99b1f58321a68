//! # Audio Buffer
//!
//! A decoded, mono, floating-point sample sequence tagged with its sample rate.
//! Every length and duration computation downstream goes through the buffer's own
//! sample rate, never through a global constant.

/// Immutable mono audio at a known sample rate.
///
/// ## Ownership:
/// The buffer owns its samples. Operations that change the length (`truncated`)
/// consume the buffer and return a new one instead of mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap decoded samples (expected range [-1.0, 1.0]) at `sample_rate` Hz.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds: `len / sample_rate`.
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Number of samples covering `seconds` at this buffer's rate (rounded down).
    pub fn samples_for(&self, seconds: f64) -> usize {
        (self.sample_rate as f64 * seconds) as usize
    }

    /// Keep only the first `max_samples` samples.
    pub fn truncated(mut self, max_samples: usize) -> Self {
        self.samples.truncate(max_samples);
        self
    }

    /// The last `count` samples (or all of them if the buffer is shorter).
    pub fn tail(&self, count: usize) -> &[f32] {
        let start = self.samples.len().saturating_sub(count);
        &self.samples[start..]
    }
}
