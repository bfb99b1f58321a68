//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nesting levels)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_STREAMING__MAX_CHUNK_SECONDS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)
//!
//! ## Runtime updates:
//! Only the `streaming` and `postprocess` sections can be changed while the server runs
//! (`PUT /config`). Everything else is fixed at startup because the engine, the bind address
//! and the isolation command are built from it.

use crate::postprocess::{BrowSettings, SmoothingSettings};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub streaming: StreamingConfig,
    pub postprocess: PostProcessConfig,
    pub vocal_isolation: VocalIsolationConfig,
    pub limits: LimitsConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: address to bind ("127.0.0.1" for local development, "0.0.0.0" in containers)
/// - `port`: TCP port
/// - `workers`: actix worker threads, 0 keeps the actix default (one per core)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

/// Which inference backend to start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// Built-in signal-driven engine.
    Procedural,
    /// No engine: the service starts, health answers, inference endpoints return 503.
    Disabled,
}

/// Inference engine settings.
///
/// ## Fields:
/// - `sample_rate`: rate every upload is decoded/resampled to before inference
/// - `fps`: output frame rate of the control sequence
/// - `num_styles`: number of selectable speaking styles (`id_idx` must be below this)
/// - `timeout_secs`: upper bound for a single engine call
/// - `device`: compute device preference ("auto", "cpu", "cuda", "metal")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub backend: EngineBackend,
    pub sample_rate: u32,
    pub fps: f64,
    pub num_styles: usize,
    pub timeout_secs: u64,
    pub device: String,
}

/// Chunk envelope for streaming sessions.
///
/// Chunks longer than `max_chunk_seconds` are truncated, chunks shorter than
/// `min_chunk_seconds` are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingConfig {
    pub max_chunk_seconds: f64,
    pub min_chunk_seconds: f64,
}

/// Tuning for the two post-processing passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostProcessConfig {
    pub smoothing: SmoothingSettings,
    pub brow: BrowSettings,
    /// Fixed seed for brow motion; unset means a fresh random draw per request.
    #[serde(default)]
    pub brow_seed: Option<u64>,
}

/// External vocal separation command (see `audio::isolation::CommandIsolator`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VocalIsolationConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub output_file: String,
}

/// Request size limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    /// Largest accepted upload, in megabytes.
    pub max_upload_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                workers: 0,
            },
            engine: EngineConfig {
                backend: EngineBackend::Procedural,
                sample_rate: 16000,
                fps: 30.0,
                num_styles: 12,
                timeout_secs: 30,
                device: "auto".to_string(),
            },
            streaming: StreamingConfig {
                max_chunk_seconds: 2.0,
                min_chunk_seconds: 0.1,
            },
            postprocess: PostProcessConfig {
                smoothing: SmoothingSettings::default(),
                brow: BrowSettings::default(),
                brow_seed: None,
            },
            vocal_isolation: VocalIsolationConfig::default(),
            limits: LimitsConfig { max_upload_mb: 50 },
        }
    }
}

impl Default for VocalIsolationConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            output_file: "vocals.wav".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`
    /// - `APP_ENGINE__BACKEND=disabled`
    /// - `APP_STREAMING__MIN_CHUNK_SECONDS=0.2`
    /// - `HOST=0.0.0.0`, `PORT=3000`: deployment platform overrides
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.engine.sample_rate == 0 {
            return Err(anyhow!("Engine sample rate must be greater than 0"));
        }

        if !(self.engine.fps > 0.0 && self.engine.fps.is_finite()) {
            return Err(anyhow!("Engine fps must be a positive number"));
        }

        if self.engine.num_styles == 0 {
            return Err(anyhow!("Engine must expose at least one style"));
        }

        if self.engine.timeout_secs == 0 {
            return Err(anyhow!("Engine timeout must be greater than 0"));
        }

        if self.limits.max_upload_mb == 0 {
            return Err(anyhow!("Upload limit must be greater than 0"));
        }

        self.validate_tunables()
    }

    /// Checks for the sections that can change at runtime.
    fn validate_tunables(&self) -> Result<()> {
        let streaming = &self.streaming;
        if !(streaming.min_chunk_seconds > 0.0) {
            return Err(anyhow!("Minimum chunk length must be greater than 0"));
        }
        if !(streaming.max_chunk_seconds > streaming.min_chunk_seconds) {
            return Err(anyhow!(
                "Maximum chunk length ({}s) must exceed the minimum ({}s)",
                streaming.max_chunk_seconds,
                streaming.min_chunk_seconds
            ));
        }

        self.postprocess
            .smoothing
            .validate()
            .map_err(|e| anyhow!("Invalid smoothing settings: {}", e))?;
        self.postprocess
            .brow
            .validate()
            .map_err(|e| anyhow!("Invalid brow settings: {}", e))?;

        Ok(())
    }

    /// Apply a partial JSON update of the runtime-tunable sections.
    ///
    /// ## Partial updates:
    /// Only the keys present in the JSON change, e.g. `{"streaming": {"min_chunk_seconds": 0.2}}`.
    /// Any other top-level key is rejected. The configuration is left untouched when the
    /// update fails to parse or validate.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json_str)?;
        let patch = patch
            .as_object()
            .ok_or_else(|| anyhow!("Configuration update must be a JSON object"))?;

        for key in patch.keys() {
            if key != "streaming" && key != "postprocess" {
                return Err(anyhow!("'{}' cannot be changed at runtime", key));
            }
        }

        let mut current = serde_json::to_value(&*self)?;
        for (key, value) in patch {
            if let Some(section) = current.get_mut(key) {
                merge_json(section, value);
            }
        }

        let updated: AppConfig = serde_json::from_value(current)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

/// Recursively overlay `patch` onto `target`; objects merge key by key, anything else replaces.
fn merge_json(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration is valid and carries the deployment values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.engine.fps, 30.0);
        assert_eq!(config.streaming.max_chunk_seconds, 2.0);
        assert_eq!(config.streaming.min_chunk_seconds, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streaming.min_chunk_seconds = 3.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.fps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"streaming": {"min_chunk_seconds": 0.25}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.streaming.min_chunk_seconds, 0.25);
        // Sibling fields are untouched
        assert_eq!(config.streaming.max_chunk_seconds, 2.0);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_update_nested_postprocess() {
        let mut config = AppConfig::default();
        let json = r#"{"postprocess": {"brow_seed": 7, "smoothing": {"window": 5}}}"#;
        config.update_from_json(json).unwrap();
        assert_eq!(config.postprocess.brow_seed, Some(7));
        assert_eq!(config.postprocess.smoothing.window, 5);
    }

    #[test]
    fn test_config_update_rejects_fixed_sections() {
        let mut config = AppConfig::default();
        let before = config.clone();
        assert!(config.update_from_json(r#"{"server": {"port": 9090}}"#).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn test_config_update_is_atomic() {
        let mut config = AppConfig::default();
        let before = config.clone();
        let json = r#"{"streaming": {"min_chunk_seconds": 5.0}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config, before);
    }
}
