//! # Audio Decoding
//!
//! Turns uploaded bytes into a mono `AudioBuffer` at the engine's sample rate.
//!
//! ## Supported inputs:
//! - **Containers** (WAV, MP3, FLAC, OGG, M4A, ...): decoded with symphonia, all channels
//!   averaged down to mono.
//! - **Raw PCM**: headerless 16-bit little-endian mono samples. Used when the bytes carry no
//!   recognizable container header and the client declared a sample rate, or when the upload is
//!   named `*.pcm` / `*.raw`.
//!
//! Audio that is not already at the target rate is resampled with rubato.

use crate::audio::buffer::AudioBuffer;
use byteorder::{LittleEndian, ReadBytesExt};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Sinc filter length used for resampling; also the zero padding appended before resampling
/// so the filter delay does not eat the tail of the signal.
const SINC_LEN: usize = 256;

/// An uploaded audio payload as received from a multipart form.
#[derive(Debug, Clone, Default)]
pub struct AudioUpload {
    pub bytes: Vec<u8>,
    /// Client-supplied file name, used as a format hint.
    pub filename: Option<String>,
    /// Sample rate declared by the client for headerless PCM.
    pub declared_sample_rate: Option<u32>,
}

impl AudioUpload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.declared_sample_rate = Some(sample_rate);
        self
    }

    /// Lower-cased file extension of the upload name, if any.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    fn is_raw_pcm(&self) -> bool {
        if matches!(self.extension().as_deref(), Some("pcm") | Some("raw")) {
            return true;
        }
        self.declared_sample_rate.is_some() && sniff_container(&self.bytes).is_none()
    }
}

/// Lowest source sample rate accepted from a container header or the `sample_rate` field.
pub const MIN_SOURCE_RATE: u32 = 8_000;
/// Highest source sample rate accepted.
pub const MAX_SOURCE_RATE: u32 = 192_000;

/// Why an upload could not be turned into samples.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// No bytes, or a container with no audio frames.
    Empty,
    /// The format could not be recognized or has no decodable audio track.
    Unsupported(String),
    /// The stream was recognized but is malformed.
    Corrupt(String),
    /// Sample-rate conversion failed.
    Resample(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "audio contains no samples"),
            DecodeError::Unsupported(msg) => write!(f, "unsupported audio format: {}", msg),
            DecodeError::Corrupt(msg) => write!(f, "corrupt audio stream: {}", msg),
            DecodeError::Resample(msg) => write!(f, "resampling failed: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode an upload into mono samples at `target_rate` Hz.
pub fn decode(upload: &AudioUpload, target_rate: u32) -> Result<AudioBuffer, DecodeError> {
    if upload.bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (samples, source_rate) = if upload.is_raw_pcm() {
        let rate = upload.declared_sample_rate.unwrap_or(target_rate);
        (pcm16_to_float(&upload.bytes)?, rate)
    } else {
        decode_container(&upload.bytes, upload.extension().as_deref())?
    };

    if !(MIN_SOURCE_RATE..=MAX_SOURCE_RATE).contains(&source_rate) {
        return Err(DecodeError::Unsupported(format!(
            "sample rate {} Hz outside {}-{} Hz",
            source_rate, MIN_SOURCE_RATE, MAX_SOURCE_RATE
        )));
    }
    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    debug!(
        samples = samples.len(),
        source_rate,
        target_rate,
        "Decoded audio upload"
    );

    let samples = resample(samples, source_rate, target_rate)?;
    Ok(AudioBuffer::new(samples, target_rate))
}

/// Guess the container format from the first bytes of a file.
pub fn sniff_container(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        Some("wav")
    } else if bytes.len() >= 3 && &bytes[0..3] == b"ID3" {
        Some("mp3")
    } else if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 {
        Some("mp3")
    } else if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        Some("m4a")
    } else if bytes.len() >= 4 && &bytes[0..4] == b"fLaC" {
        Some("flac")
    } else if bytes.len() >= 4 && &bytes[0..4] == b"OggS" {
        Some("ogg")
    } else {
        None
    }
}

/// Convert 16-bit little-endian PCM bytes to floats in [-1.0, 1.0).
pub fn pcm16_to_float(data: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if data.len() % 2 != 0 {
        return Err(DecodeError::Corrupt(
            "PCM data length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

fn decode_container(bytes: &[u8], extension: Option<&str>) -> Result<(Vec<f32>, u32), DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension.or_else(|| sniff_container(bytes)) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported("no audio track found".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut sample_rate = codec_params.sample_rate;
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(DecodeError::Corrupt(err.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                let channels = spec.channels.count().max(1);

                let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                interleaved.copy_interleaved_ref(decoded);
                downmix_into(interleaved.samples(), channels, &mut samples);
            }
            Err(SymphoniaError::DecodeError(err)) => {
                debug!("Skipping undecodable packet: {}", err);
            }
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(DecodeError::Corrupt(err.to_string())),
        }
    }

    let sample_rate = sample_rate
        .ok_or_else(|| DecodeError::Unsupported("sample rate unknown".to_string()))?;
    Ok((samples, sample_rate))
}

/// Average interleaved frames down to one channel.
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Resample mono audio from `input_rate` to `output_rate`.
///
/// The output length is `round(len * output_rate / input_rate)`; the filter delay is
/// compensated so the signal is not shifted in time.
pub fn resample(samples: Vec<f32>, input_rate: u32, output_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if input_rate == 0 || output_rate == 0 {
        return Err(DecodeError::Resample("sample rate must be positive".to_string()));
    }
    if input_rate == output_rate || samples.is_empty() {
        return Ok(samples);
    }

    let ratio = output_rate as f64 / input_rate as f64;
    let expected_len = (samples.len() as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut padded = samples;
    padded.extend(std::iter::repeat(0.0).take(SINC_LEN));

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, padded.len(), 1)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let output = resampler
        .process(&[padded], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let resampled = output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .skip(delay)
        .take(expected_len)
        .collect();
    Ok(resampled)
}

/// Encode mono float samples as a 16-bit PCM WAV file.
#[cfg(test)]
pub(crate) fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
