//! # Brow Secondary Motion
//!
//! Speech models tend to leave the upper face frozen. This pass adds a brow raise over each
//! sustained loud passage so the face does not look static while talking.
//!
//! ## Shape of the motion:
//! - one raised-cosine bump per loud region (zero at both edges, peak in the middle)
//! - per-region strength drawn uniformly from `[strength_min, strength_max]`
//! - amplitude scales with the local volume, capped at `loud_reference`
//! - applied as `w + (1 - w) * a`, which moves a weight toward 1 without crossing it
//!
//! The random draw comes from the caller's RNG, so a seeded `StdRng` gives identical output
//! for identical input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::runs_where;
use crate::audio::VolumeEnvelope;
use crate::expression::channels::BROW_RAISE_CHANNELS;
use crate::expression::ControlFrame;

/// Tuning for [`apply_brow_movement`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowSettings {
    /// RMS above which a frame counts as loud.
    pub volume_threshold: f32,
    /// Shortest loud region that gets a brow raise.
    pub min_region_frames: usize,
    pub strength_min: f32,
    pub strength_max: f32,
    /// Largest weight added at full strength and full volume.
    pub max_amplitude: f32,
    /// Volume at which the amplitude stops growing.
    pub loud_reference: f32,
}

impl Default for BrowSettings {
    fn default() -> Self {
        Self {
            volume_threshold: 0.02,
            min_region_frames: 8,
            strength_min: 0.5,
            strength_max: 1.0,
            max_amplitude: 0.3,
            loud_reference: 0.1,
        }
    }
}

impl BrowSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.strength_min) || !(0.0..=1.0).contains(&self.strength_max) {
            return Err("strength bounds must be within [0, 1]".to_string());
        }
        if self.strength_min > self.strength_max {
            return Err("strength_min must not exceed strength_max".to_string());
        }
        if !(0.0..=1.0).contains(&self.max_amplitude) {
            return Err("max_amplitude must be within [0, 1]".to_string());
        }
        if !(self.loud_reference > 0.0) {
            return Err("loud_reference must be positive".to_string());
        }
        if !(self.volume_threshold >= 0.0) {
            return Err("volume_threshold must be non-negative".to_string());
        }
        Ok(())
    }
}

/// RNG for one request: seeded when `seed` is set, OS entropy otherwise.
pub fn brow_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Add brow raises over the loud regions of `frames`.
pub fn apply_brow_movement<R: Rng + ?Sized>(
    frames: &[ControlFrame],
    volume: &VolumeEnvelope,
    settings: &BrowSettings,
    rng: &mut R,
) -> Vec<ControlFrame> {
    let mut out = frames.to_vec();

    let regions = runs_where(frames.len(), settings.min_region_frames, |i| {
        volume.at(i) > settings.volume_threshold
    });

    for region in regions {
        let strength = if settings.strength_max > settings.strength_min {
            rng.random_range(settings.strength_min..=settings.strength_max)
        } else {
            settings.strength_min
        };
        let len = region.len();

        for i in region.clone() {
            let position = if len > 1 {
                (i - region.start) as f32 / (len - 1) as f32
            } else {
                0.5
            };
            let bump = 0.5 * (1.0 - (2.0 * PI * position).cos());
            let loudness = (volume.at(i) / settings.loud_reference).min(1.0);
            let amplitude = (settings.max_amplitude * strength * loudness * bump).clamp(0.0, 1.0);

            for channel in BROW_RAISE_CHANNELS {
                let w = out[i][channel].clamp(0.0, 1.0);
                out[i][channel] = w + (1.0 - w) * amplitude;
            }
        }
    }

    out
}
