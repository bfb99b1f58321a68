//! # Audio Processing Module
//!
//! Everything the pipelines need to go from uploaded bytes to signals the engine and the
//! post-processing passes can use.
//!
//! ## Key Components:
//! - **Audio Buffer**: immutable mono samples tagged with their sample rate
//! - **Decoder**: container/PCM decoding and resampling to the engine rate
//! - **Volume Envelope**: per-output-frame RMS loudness
//! - **Vocal Isolation**: optional external pre-filter for the one-shot pipeline
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: whatever the engine declares (16kHz for the bundled engine)
//! - **Channels**: mono (multi-channel input is averaged down)

pub mod buffer;       // Immutable mono sample buffer
pub mod decode;       // Container and raw PCM decoding, resampling
pub mod envelope;     // Frame-aligned RMS envelope
pub mod isolation;    // Vocal isolation collaborator

pub use buffer::AudioBuffer;
pub use decode::{decode, AudioUpload, DecodeError};
pub use envelope::{volume_envelope, VolumeEnvelope};
pub use isolation::{CommandIsolator, IsolatedTrack, VocalIsolator};
