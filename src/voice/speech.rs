//! Speech output through a primary/fallback engine chain
//!
//! The primary engine is the operating system's speech command run as a
//! separate process. If it fails the text goes to the fallback engines in
//! order: the in-process platform synthesizer, then optional HTTP synthesis.
//! Failures never reach the caller.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::playback::AudioPlayback;
use super::tts::TextToSpeech;
use crate::{Error, Result};

/// Something that can turn text into audible speech
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Short engine name for logs
    fn name(&self) -> &'static str;

    /// Speak already-sanitized text, returning once it has been spoken
    ///
    /// # Errors
    ///
    /// Returns error if the text could not be spoken
    async fn say(&self, text: &str) -> Result<()>;
}

/// Speaks text, falling back from the primary engine through the fallbacks
pub struct SpeechOutput {
    primary: Box<dyn SpeechEngine>,
    fallbacks: Vec<Box<dyn SpeechEngine>>,
}

impl SpeechOutput {
    /// Create a speech output chain
    #[must_use]
    pub fn new(primary: Box<dyn SpeechEngine>, fallbacks: Vec<Box<dyn SpeechEngine>>) -> Self {
        Self { primary, fallbacks }
    }

    /// Engine names in the order they are tried
    #[must_use]
    pub fn engines(&self) -> Vec<&'static str> {
        std::iter::once(self.primary.name())
            .chain(self.fallbacks.iter().map(|e| e.name()))
            .collect()
    }

    /// Speak text
    ///
    /// Text that is empty after sanitizing is not spoken at all. Engine
    /// failures are logged here and never returned.
    pub async fn speak(&self, text: &str) {
        let clean = sanitize(text);
        if clean.is_empty() {
            return;
        }

        tracing::info!(text = %clean, "speaking");

        let mut failed = match self.primary.say(&clean).await {
            Ok(()) => return,
            Err(e) => (self.primary.name(), e),
        };

        for fallback in &self.fallbacks {
            tracing::warn!(
                engine = failed.0,
                fallback = fallback.name(),
                error = %failed.1,
                "speech failed, using fallback"
            );

            match fallback.say(&clean).await {
                Ok(()) => return,
                Err(e) => failed = (fallback.name(), e),
            }
        }

        tracing::error!(engine = failed.0, error = %failed.1, "speech output failed");
    }
}

/// Strip emphasis markers and quotes, collapse newlines, trim
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '`' | '"' | '\u{201c}' | '\u{201d}'))
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Operating system family, selects the speech command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Platform this binary was built for
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// A fully prepared OS speech invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCommand {
    pub program: &'static str,
    pub args: Vec<String>,
    /// Text piped on stdin, when the command reads it there
    pub stdin: Option<String>,
}

/// Build the speech command for a platform
///
/// `voice` is either a gender hint ("female", "male") or a platform voice name.
#[must_use]
pub fn speech_command(platform: Platform, voice: &str, text: &str) -> SpeechCommand {
    let hint = voice.trim().to_lowercase();

    match platform {
        Platform::Windows => {
            let select = match hint.as_str() {
                "female" => "$syn.SelectVoiceByHints('Female');".to_string(),
                "male" => "$syn.SelectVoiceByHints('Male');".to_string(),
                _ => format!("$syn.SelectVoice('{}');", powershell_quote(voice)),
            };
            let script = format!(
                "Add-Type -AssemblyName System.Speech; \
                 $syn = New-Object System.Speech.Synthesis.SpeechSynthesizer; \
                 {select} \
                 $syn.Speak('{}');",
                powershell_quote(text)
            );
            SpeechCommand {
                program: "powershell",
                args: vec![
                    "-NoProfile".to_string(),
                    "-NonInteractive".to_string(),
                    "-Command".to_string(),
                    script,
                ],
                stdin: None,
            }
        }
        Platform::MacOs => {
            let name = match hint.as_str() {
                "female" => "Samantha",
                "male" => "Alex",
                _ => voice,
            };
            SpeechCommand {
                program: "say",
                args: vec!["-v".to_string(), name.to_string()],
                stdin: Some(text.to_string()),
            }
        }
        Platform::Linux => {
            let name = match hint.as_str() {
                "female" => "en+f3",
                "male" => "en+m3",
                _ => voice,
            };
            SpeechCommand {
                program: "espeak-ng",
                args: vec!["-v".to_string(), name.to_string(), "--stdin".to_string()],
                stdin: Some(text.to_string()),
            }
        }
    }
}

/// Escape text for a single-quoted `PowerShell` string
fn powershell_quote(text: &str) -> String {
    text.replace('\'', "''")
}

/// Primary engine: the OS speech command in its own process
pub struct SystemSpeech {
    platform: Platform,
    voice: String,
    timeout: Duration,
}

impl SystemSpeech {
    /// Create the OS speech engine for the current platform
    #[must_use]
    pub fn new(voice: String, timeout: Duration) -> Self {
        let platform = Platform::current();
        let program = speech_command(platform, &voice, "").program;

        if which::which(program).is_err() {
            tracing::warn!(program, "speech command not found, fallback engine will be used");
        } else {
            tracing::debug!(program, voice = %voice, "system speech initialized");
        }

        Self {
            platform,
            voice,
            timeout,
        }
    }
}

#[async_trait]
impl SpeechEngine for SystemSpeech {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn say(&self, text: &str) -> Result<()> {
        let command = speech_command(self.platform, &self.voice, text);

        let mut child = Command::new(command.program)
            .args(&command.args)
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to spawn {}: {e}", command.program)))?;

        if let (Some(input), Some(mut stdin)) = (command.stdin, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| Error::Tts(format!("failed to write to {}: {e}", command.program)))?;
        }

        let status = tokio::time::timeout(self.timeout, child.wait())
            .await
            .map_err(|_| {
                Error::Tts(format!("{} timed out after {:?}", command.program, self.timeout))
            })?
            .map_err(|e| Error::Tts(format!("{} failed: {e}", command.program)))?;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(Error::Tts(format!("{} exited with code {code}", command.program)));
        }

        Ok(())
    }
}

/// Optional fallback: HTTP synthesis played through the local output device
pub struct SynthesizedSpeech {
    tts: TextToSpeech,
    playback: AudioPlayback,
}

impl SynthesizedSpeech {
    /// Create the HTTP synthesis engine
    #[must_use]
    pub const fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self { tts, playback }
    }
}

#[async_trait]
impl SpeechEngine for SynthesizedSpeech {
    fn name(&self) -> &'static str {
        "synthesized"
    }

    async fn say(&self, text: &str) -> Result<()> {
        let audio = self.tts.synthesize(text).await?;
        self.playback.play_mp3(&audio).await
    }
}
