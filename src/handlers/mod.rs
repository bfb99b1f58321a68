//! HTTP handlers and the multipart form reader they share.

pub mod config;
pub mod inference;
pub mod stream;

pub use self::config::*;
pub use self::inference::*;
pub use self::stream::*;

use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;
use std::collections::HashMap;

use crate::audio::AudioUpload;
use crate::error::{AppError, AppResult};
use crate::postprocess::PostProcessOptions;

/// Field names always treated as file uploads, even without a filename.
const FILE_FIELDS: [&str; 3] = ["audio_file", "audio_chunk", "audio"];

/// An uploaded file field.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

/// A fully read multipart form: text fields and file fields by name.
#[derive(Debug, Default)]
pub struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl FormData {
    /// Read every field of `payload`, rejecting uploads larger than `max_bytes` in total.
    pub async fn read(mut payload: Multipart, max_bytes: usize) -> AppResult<Self> {
        let mut form = FormData::default();
        let mut total = 0usize;

        while let Some(item) = payload.next().await {
            let mut field: Field = item?;

            let content_disposition = field.content_disposition().ok_or_else(|| {
                AppError::InvalidRequest("Missing content disposition".to_string())
            })?;
            let name = content_disposition
                .get_name()
                .ok_or_else(|| AppError::InvalidRequest("Missing field name".to_string()))?
                .to_string();
            let filename = content_disposition.get_filename().map(|s| s.to_string());

            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk?;
                total += chunk.len();
                if total > max_bytes {
                    return Err(AppError::InvalidRequest(format!(
                        "Upload too large (max: {} bytes)",
                        max_bytes
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            if filename.is_some() || FILE_FIELDS.contains(&name.as_str()) {
                form.files.insert(name, UploadedFile { bytes, filename });
            } else {
                let value = String::from_utf8(bytes).map_err(|_| {
                    AppError::InvalidRequest(format!("Field '{}' is not valid UTF-8", name))
                })?;
                form.fields.insert(name, value.trim().to_string());
            }
        }

        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Take the first present file among `names`.
    pub fn take_file(&mut self, names: &[&str]) -> Option<UploadedFile> {
        names.iter().find_map(|name| self.files.remove(*name))
    }

    /// Boolean form field; absent means `false`.
    pub fn flag(&self, name: &str) -> AppResult<bool> {
        match self.text(name) {
            None => Ok(false),
            Some(value) => parse_bool(value).ok_or_else(|| {
                AppError::InvalidRequest(format!("Field '{}' must be a boolean, got '{}'", name, value))
            }),
        }
    }

    /// Numeric form field; absent means `None`.
    pub fn number<T: std::str::FromStr>(&self, name: &str) -> AppResult<Option<T>> {
        match self.text(name) {
            None | Some("") => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| {
                AppError::InvalidRequest(format!("Field '{}' has an invalid value '{}'", name, value))
            }),
        }
    }

    /// The `movement_smooth` / `brow_movement` toggles.
    pub fn postprocess_options(&self) -> AppResult<PostProcessOptions> {
        Ok(PostProcessOptions {
            movement_smooth: self.flag("movement_smooth")?,
            brow_movement: self.flag("brow_movement")?,
        })
    }
}

impl UploadedFile {
    pub fn into_upload(self, declared_sample_rate: Option<u32>) -> AudioUpload {
        let mut upload = AudioUpload::new(self.bytes);
        if let Some(filename) = self.filename {
            upload = upload.with_filename(filename);
        }
        if let Some(sample_rate) = declared_sample_rate {
            upload = upload.with_sample_rate(sample_rate);
        }
        upload
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
