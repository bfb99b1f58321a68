//! # Vocal Isolation
//!
//! Optional pre-filter for the one-shot pipeline: separate the vocal track from music or
//! background noise before inference. Isolation is best-effort. Every failure is reported
//! as "no isolated track" and the caller falls back to the original audio.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::VocalIsolationConfig;

/// An isolated vocal track on disk.
///
/// The track lives in a temporary directory owned by this value; dropping it removes the
/// directory and everything the separator wrote into it.
#[derive(Debug)]
pub struct IsolatedTrack {
    path: PathBuf,
    _dir: TempDir,
}

impl IsolatedTrack {
    pub fn new(path: PathBuf, dir: TempDir) -> Self {
        Self { path, _dir: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Separates vocals from an audio file.
pub trait VocalIsolator: Send + Sync {
    /// Return the isolated vocal track for `input`, or `None` if isolation failed or
    /// produced nothing.
    fn isolate(&self, input: &Path) -> Option<IsolatedTrack>;
}

/// Runs an external separation tool.
///
/// ## Argument templating:
/// `{input}` is replaced by the input file path and `{output_dir}` by a fresh temporary
/// directory. After the command exits successfully, `output_file` (relative to the output
/// directory) is expected to exist.
///
/// ## Example:
/// ```toml
/// [vocal_isolation]
/// command = "demucs"
/// args = ["--two-stems=vocals", "-n", "htdemucs", "-o", "{output_dir}", "{input}"]
/// output_file = "htdemucs/{stem}/vocals.wav"
/// ```
/// `{stem}` in `output_file` is the input file name without extension.
#[derive(Debug, Clone)]
pub struct CommandIsolator {
    program: String,
    args: Vec<String>,
    output_file: String,
}

impl CommandIsolator {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_file: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output_file: output_file.into(),
        }
    }

    /// Build an isolator from configuration; `None` when no command is configured.
    pub fn from_config(config: &VocalIsolationConfig) -> Option<Self> {
        let program = config.command.as_deref()?.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self::new(program, config.args.clone(), config.output_file.clone()))
    }

    fn expand(template: &str, input: &Path, output_dir: &Path) -> String {
        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        template
            .replace("{input}", &input.to_string_lossy())
            .replace("{output_dir}", &output_dir.to_string_lossy())
            .replace("{stem}", stem)
    }
}

impl VocalIsolator for CommandIsolator {
    fn isolate(&self, input: &Path) -> Option<IsolatedTrack> {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Vocal isolation skipped, cannot create output directory: {}", e);
                return None;
            }
        };

        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| Self::expand(arg, input, dir.path()))
            .collect();

        debug!(program = %self.program, ?args, "Running vocal isolation");

        let status = match Command::new(&self.program).args(&args).output() {
            Ok(output) => output.status,
            Err(e) => {
                warn!(program = %self.program, "Vocal isolation command failed to start: {}", e);
                return None;
            }
        };

        if !status.success() {
            warn!(program = %self.program, %status, "Vocal isolation command failed");
            return None;
        }

        let path = dir.path().join(Self::expand(&self.output_file, input, dir.path()));
        if !path.exists() {
            warn!(path = %path.display(), "Vocal isolation produced no output file");
            return None;
        }

        Some(IsolatedTrack::new(path, dir))
    }
}
