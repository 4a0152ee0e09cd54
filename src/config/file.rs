//! TOML configuration file loading
//!
//! Supports `~/.config/aura/config.toml` (or `--config <path>`) as a persistent
//! config source. All fields are optional; the file is a partial overlay on top
//! of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct AuraConfigFile {
    /// Inference backend configuration
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Wake phrase configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Utterance capture and transcription
    #[serde(default)]
    pub listen: ListenFileConfig,

    /// Speech output
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Dormancy and conversation session
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Inference backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the backend (e.g. "http://localhost:11434")
    pub url: Option<String>,

    /// Model identifier (e.g. "llama3.1")
    pub model: Option<String>,

    /// Conversation memory mode ("chat" or "generate")
    pub mode: Option<String>,

    /// Request timeout in seconds, 0 disables
    pub request_timeout_secs: Option<u64>,

    /// Maximum user/assistant messages kept in chat mode
    pub max_history_messages: Option<usize>,
}

/// Wake phrase configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    pub phrases: Option<Vec<String>>,
    pub activation_threshold: Option<f32>,
    pub vad_threshold: Option<f32>,
    pub vad_energy: Option<f32>,
    pub frame_samples: Option<usize>,
}

/// Utterance capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct ListenFileConfig {
    pub max_phrase_secs: Option<f64>,
    pub initial_timeout_secs: Option<f64>,
    pub pause_secs: Option<f64>,
    pub calibration_secs: Option<f64>,
    pub min_energy: Option<f32>,
    pub beam_width: Option<u32>,
    pub stt_url: Option<String>,
    pub stt_model: Option<String>,
    pub scratch_path: Option<PathBuf>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Voice hint for the OS speech command (e.g. "female", "Samantha")
    pub voice: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub native_fallback: Option<bool>,
    pub fallback_url: Option<String>,
    pub fallback_model: Option<String>,
    pub fallback_voice: Option<String>,
    pub fallback_speed: Option<f32>,
    pub fallback_api_key: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub dormancy_timeout_secs: Option<u64>,
    pub anti_echo_ms: Option<u64>,
    pub shutdown_words: Option<Vec<String>>,
    pub wake_ack: Option<String>,
    pub farewell: Option<String>,
}

/// Parse a configuration file from TOML text
///
/// # Errors
///
/// Returns error if the text is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<AuraConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file
///
/// An explicit path must exist and parse. Without one, the standard path is
/// tried and `AuraConfigFile::default()` is returned if it is missing or broken.
///
/// # Errors
///
/// Returns error only for an explicit path that cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<AuraConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = parse_config_file(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(AuraConfigFile::default());
    };

    if !path.exists() {
        return Ok(AuraConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(AuraConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(AuraConfigFile::default())
        }
    }
}

/// Return the config file path: `<config_dir>/aura/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aura").join("config.toml"))
}
