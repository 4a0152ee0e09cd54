//! Daemon - the voice assistant service
//!
//! Initializes audio hardware and every capability explicitly, then runs the
//! dormancy controller until the session ends or Ctrl-C is pressed.

use std::sync::Arc;

use crate::backend::ConversationBackend;
use crate::config::SpeechConfig;
use crate::controller::{DormancyController, SessionPolicy};
use crate::voice::{
    AudioCapture, AudioPlayback, EnergyVad, HttpTranscriber, ListenPolicy, NativeSpeech,
    SpeechEngine, SpeechOutput, SynthesizedSpeech, SystemSpeech, TextToSpeech,
    TranscriptWakeScorer, TranscriptionGate, Transcriber, WakeConfirmer, WakeProfile,
};
use crate::{Config, Error, Result};

/// The Aura daemon - owns the session and its devices
pub struct Daemon {
    controller: DormancyController,
}

impl Daemon {
    /// Initialize hardware and capabilities
    ///
    /// A missing microphone is fatal. An unreachable backend is not: the
    /// session starts and answers that it cannot connect.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or the configuration is invalid
    pub async fn new(config: Config) -> Result<Self> {
        let Config {
            backend,
            wake,
            listen,
            speech,
            session,
            data_dir,
        } = config;

        tracing::debug!(path = %data_dir.display(), "data directory");

        let capture = AudioCapture::new()
            .map_err(|e| Error::Audio(format!("microphone initialization failed: {e}")))?;

        let speech_output = build_speech(speech)?;

        let transcriber: Arc<dyn Transcriber> = Arc::new(HttpTranscriber::new(
            listen.stt_url.clone(),
            listen.stt_model.clone(),
        )?);
        tracing::info!(url = %listen.stt_url, model = %listen.stt_model, "transcription endpoint");

        let scorer = TranscriptWakeScorer::new(
            Arc::clone(&transcriber),
            &wake.phrases,
            wake.vad_energy,
            listen.beam_width,
        );
        let vad = EnergyVad::new(wake.vad_energy)?;
        let confirmer = WakeConfirmer::new(
            WakeProfile::from(&wake),
            Box::new(scorer),
            Box::new(vad),
            wake.vad_threshold,
        );

        let gate = TranscriptionGate::new(
            transcriber,
            ListenPolicy::from(&listen),
            listen.beam_width,
            listen.scratch_path.clone(),
        );

        let assistant = ConversationBackend::connect(&backend).await?;

        let policy = SessionPolicy::from_config(&session, &listen);
        let controller = DormancyController::new(
            policy,
            Box::new(capture),
            confirmer,
            gate,
            Box::new(assistant),
            speech_output,
        );

        Ok(Self { controller })
    }

    /// Run until a shutdown word is heard or Ctrl-C is pressed
    ///
    /// # Errors
    ///
    /// Returns error if the Ctrl-C handler cannot be installed
    #[allow(clippy::future_not_send)]
    pub async fn run(mut self) -> Result<()> {
        // cpal streams aren't Send, so the session runs on this task
        tokio::select! {
            () = self.controller.run() => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("shutdown requested");
            }
        }

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Build the speech chain
///
/// The OS command comes first, then the in-process platform synthesizer,
/// then HTTP synthesis when a fallback URL is configured and an output
/// device is available.
///
/// # Errors
///
/// Returns error if the HTTP fallback engine is misconfigured
pub fn build_speech(config: SpeechConfig) -> Result<SpeechOutput> {
    let mut fallbacks: Vec<Box<dyn SpeechEngine>> = Vec::new();

    if config.native_fallback {
        match NativeSpeech::new(&config.voice, config.command_timeout) {
            Ok(native) => fallbacks.push(Box::new(native)),
            Err(e) => tracing::warn!(error = %e, "native speech unavailable"),
        }
    }

    if let Some(url) = config.fallback_url {
        match AudioPlayback::new() {
            Ok(playback) => {
                let tts = TextToSpeech::new(
                    url,
                    config.fallback_api_key,
                    config.fallback_model,
                    config.fallback_voice,
                    config.fallback_speed,
                )?;
                fallbacks.push(Box::new(SynthesizedSpeech::new(tts, playback)));
            }
            Err(e) => {
                tracing::warn!(error = %e, "no output device, HTTP speech disabled");
            }
        }
    }

    if fallbacks.is_empty() {
        tracing::warn!("no fallback speech engine available");
    }

    let primary = SystemSpeech::new(config.voice, config.command_timeout);
    Ok(SpeechOutput::new(Box::new(primary), fallbacks))
}
