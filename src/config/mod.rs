//! Configuration management for the Aura assistant
//!
//! Layering: defaults, then the TOML file, then environment variables, then
//! CLI flags (applied by the binary).

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::backend::ConversationMode;
use crate::voice::ListenPolicy;
use crate::{Error, Result};

use file::AuraConfigFile;

/// Aura assistant configuration
#[derive(Debug)]
pub struct Config {
    /// Inference backend
    pub backend: BackendConfig,

    /// Wake phrase detection
    pub wake: WakeConfig,

    /// Utterance capture and transcription
    pub listen: ListenConfig,

    /// Speech output chain
    pub speech: SpeechConfig,

    /// Dormancy and conversation session
    pub session: SessionConfig,

    /// Path to data directory (scratch audio)
    pub data_dir: PathBuf,
}

/// Inference backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the Ollama-style server
    pub url: String,

    /// Configured model identifier
    pub model: String,

    /// Conversation memory mode
    pub mode: ConversationMode,

    /// Per-request timeout, `None` waits indefinitely
    pub request_timeout: Option<Duration>,

    /// User/assistant messages kept in chat mode (system entry excluded)
    pub max_history_messages: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            mode: ConversationMode::Chat,
            request_timeout: Some(Duration::from_secs(120)),
            max_history_messages: 40,
        }
    }
}

/// Wake phrase configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Registered wake phrases
    pub phrases: Vec<String>,

    /// Wake confidence that must be exceeded
    pub activation_threshold: f32,

    /// Speech probability a VAD sub-window must exceed
    pub vad_threshold: f32,

    /// RMS energy at which the energy VAD reports 0.5
    pub vad_energy: f32,

    /// Samples per audio frame fed to the scorer
    pub frame_samples: usize,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrases: vec!["hey aura".to_string()],
            activation_threshold: 0.5,
            vad_threshold: 0.5,
            vad_energy: 0.02,
            frame_samples: crate::voice::FRAME_SAMPLES,
        }
    }
}

/// Utterance capture and transcription configuration
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Longest phrase captured before transcription is forced
    pub max_phrase: Duration,

    /// Give up when no speech starts within this window
    pub initial_timeout: Duration,

    /// Trailing silence that ends an utterance
    pub pause: Duration,

    /// Ambient noise measurement before each capture
    pub calibration: Duration,

    /// Lower bound for the speech energy threshold
    pub min_energy: f32,

    /// Beam width passed to the transcriber
    pub beam_width: u32,

    /// OpenAI-compatible transcription endpoint
    pub stt_url: String,

    /// Transcription model identifier
    pub stt_model: String,

    /// Scratch WAV file, overwritten on every capture
    pub scratch_path: PathBuf,
}

/// Speech output configuration
#[derive(Debug)]
pub struct SpeechConfig {
    /// Voice hint for the OS speech command
    pub voice: String,

    /// Give up on a single utterance after this long
    pub command_timeout: Duration,

    /// Fall back to the platform synthesizer in-process
    pub native_fallback: bool,

    /// OpenAI-compatible speech endpoint, tried after the native engine
    pub fallback_url: Option<String>,

    /// Fallback TTS model
    pub fallback_model: String,

    /// Fallback TTS voice
    pub fallback_voice: String,

    /// Fallback TTS speed multiplier
    pub fallback_speed: f32,

    /// Fallback TTS API key
    pub fallback_api_key: Option<SecretString>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            voice: "female".to_string(),
            command_timeout: Duration::from_secs(60),
            native_fallback: true,
            fallback_url: None,
            fallback_model: "tts-1".to_string(),
            fallback_voice: "nova".to_string(),
            fallback_speed: 1.0,
            fallback_api_key: None,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which Active falls back to Dormant
    pub dormancy_timeout: Duration,

    /// Pause between wake polls
    pub anti_echo: Duration,

    /// Transcripts containing any of these end the session
    pub shutdown_words: Vec<String>,

    /// Spoken on wake confirmation
    pub wake_ack: String,

    /// Spoken before terminating
    pub farewell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dormancy_timeout: Duration::from_secs(30),
            anti_echo: Duration::from_millis(1000),
            shutdown_words: vec!["quit".to_string(), "exit".to_string(), "shutdown".to_string()],
            wake_ack: "Online.".to_string(),
            farewell: "Goodbye.".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or a value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(config_path)?;
        let data_dir = default_data_dir();

        let mut config = Self::from_file(file, data_dir)?;
        config.apply_env(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Build configuration from defaults overlaid with a parsed file
    ///
    /// # Errors
    ///
    /// Returns error if a file value is invalid
    pub fn from_file(file: AuraConfigFile, data_dir: PathBuf) -> Result<Self> {
        let defaults_backend = BackendConfig::default();
        let backend = BackendConfig {
            url: file.backend.url.unwrap_or(defaults_backend.url),
            model: file.backend.model.unwrap_or(defaults_backend.model),
            mode: file
                .backend
                .mode
                .as_deref()
                .map(ConversationMode::parse)
                .transpose()?
                .unwrap_or(defaults_backend.mode),
            request_timeout: file
                .backend
                .request_timeout_secs
                .map_or(defaults_backend.request_timeout, timeout_from_secs),
            max_history_messages: file
                .backend
                .max_history_messages
                .unwrap_or(defaults_backend.max_history_messages),
        };

        let defaults_wake = WakeConfig::default();
        let wake = WakeConfig {
            phrases: file.wake.phrases.unwrap_or(defaults_wake.phrases),
            activation_threshold: file
                .wake
                .activation_threshold
                .unwrap_or(defaults_wake.activation_threshold),
            vad_threshold: file.wake.vad_threshold.unwrap_or(defaults_wake.vad_threshold),
            vad_energy: file.wake.vad_energy.unwrap_or(defaults_wake.vad_energy),
            frame_samples: file.wake.frame_samples.unwrap_or(defaults_wake.frame_samples),
        };

        let policy = ListenPolicy::default();
        let listen = ListenConfig {
            max_phrase: duration_or(file.listen.max_phrase_secs, Duration::from_secs(10))?,
            initial_timeout: duration_or(file.listen.initial_timeout_secs, policy.initial_timeout)?,
            pause: duration_or(file.listen.pause_secs, policy.pause)?,
            calibration: duration_or(file.listen.calibration_secs, policy.calibration)?,
            min_energy: file.listen.min_energy.unwrap_or(policy.min_energy),
            beam_width: file.listen.beam_width.unwrap_or(5),
            stt_url: file
                .listen
                .stt_url
                .unwrap_or_else(|| "http://localhost:8000/v1/audio/transcriptions".to_string()),
            stt_model: file
                .listen
                .stt_model
                .unwrap_or_else(|| "Systran/faster-whisper-tiny.en".to_string()),
            scratch_path: file
                .listen
                .scratch_path
                .unwrap_or_else(|| data_dir.join("scratch.wav")),
        };

        let defaults_speech = SpeechConfig::default();
        let speech = SpeechConfig {
            voice: file.speech.voice.unwrap_or(defaults_speech.voice),
            command_timeout: file
                .speech
                .command_timeout_secs
                .map_or(defaults_speech.command_timeout, Duration::from_secs),
            native_fallback: file
                .speech
                .native_fallback
                .unwrap_or(defaults_speech.native_fallback),
            fallback_url: file.speech.fallback_url,
            fallback_model: file.speech.fallback_model.unwrap_or(defaults_speech.fallback_model),
            fallback_voice: file.speech.fallback_voice.unwrap_or(defaults_speech.fallback_voice),
            fallback_speed: file.speech.fallback_speed.unwrap_or(defaults_speech.fallback_speed),
            fallback_api_key: file.speech.fallback_api_key.map(SecretString::from),
        };

        let defaults_session = SessionConfig::default();
        let session = SessionConfig {
            dormancy_timeout: file
                .session
                .dormancy_timeout_secs
                .map_or(defaults_session.dormancy_timeout, Duration::from_secs),
            anti_echo: file
                .session
                .anti_echo_ms
                .map_or(defaults_session.anti_echo, Duration::from_millis),
            shutdown_words: file
                .session
                .shutdown_words
                .unwrap_or(defaults_session.shutdown_words),
            wake_ack: file.session.wake_ack.unwrap_or(defaults_session.wake_ack),
            farewell: file.session.farewell.unwrap_or(defaults_session.farewell),
        };

        let config = Self {
            backend,
            wake,
            listen,
            speech,
            session,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function
    ///
    /// # Errors
    ///
    /// Returns error if an override has an invalid value
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.backend.url = normalize_host(&host);
        }
        if let Some(model) = lookup("AURA_MODEL") {
            self.backend.model = model;
        }
        if let Some(mode) = lookup("AURA_BACKEND_MODE") {
            self.backend.mode = ConversationMode::parse(&mode)?;
        }
        if let Some(url) = lookup("AURA_STT_URL") {
            self.listen.stt_url = url;
        }
        if let Some(url) = lookup("AURA_TTS_URL") {
            self.speech.fallback_url = Some(url);
        }
        if let Some(key) = lookup("AURA_TTS_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.speech.fallback_api_key = Some(SecretString::from(key));
        }
        if let Some(phrase) = lookup("AURA_WAKE_PHRASE") {
            self.wake.phrases = vec![phrase];
        }
        if let Some(secs) = lookup("AURA_DORMANCY_TIMEOUT") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::Config(format!("AURA_DORMANCY_TIMEOUT must be whole seconds, got {secs:?}"))
            })?;
            self.session.dormancy_timeout = Duration::from_secs(secs);
        }

        self.validate()
    }

    /// Check value ranges
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.wake.activation_threshold) {
            return Err(Error::Config(
                "wake.activation_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.wake.vad_threshold) {
            return Err(Error::Config("wake.vad_threshold must be within [0, 1]".to_string()));
        }
        if self.wake.phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }
        if self.wake.frame_samples == 0 {
            return Err(Error::Config("wake.frame_samples must be positive".to_string()));
        }
        if self.listen.beam_width == 0 {
            return Err(Error::Config("listen.beam_width must be positive".to_string()));
        }
        Ok(())
    }
}

/// Data directory (`~/.local/share/aura` on Linux), created if missing
fn default_data_dir() -> PathBuf {
    let data_dir = directories::ProjectDirs::from("dev", "aura", "aura")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir
}

/// `0` disables the timeout
fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn duration_or(value: Option<f64>, default: Duration) -> Result<Duration> {
    let Some(secs) = value else {
        return Ok(default);
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::Config(format!("invalid duration {secs}: {e}")))
}

/// `OLLAMA_HOST` may omit the scheme (e.g. "127.0.0.1:11434")
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
