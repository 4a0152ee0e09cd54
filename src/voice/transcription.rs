//! Utterance capture and speech-to-text
//!
//! [`TranscriptionGate::listen`] measures the ambient noise floor, waits for
//! speech, captures until a trailing pause (or the phrase limit), writes the
//! audio to the scratch file and hands it to a [`Transcriber`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::capture::{
    CaptureGuard, FRAME_SAMPLES, Microphone, SAMPLE_RATE, rms_energy, samples_for,
    samples_to_wav, write_scratch,
};
use crate::config::ListenConfig;
use crate::{Error, Result};

/// Audio kept from before speech onset so the first syllable is not clipped
const PRE_ROLL_SAMPLES: usize = 4800; // 0.3 seconds

/// Noise floor multiplier for the speech energy threshold
const NOISE_MULTIPLIER: f32 = 1.5;

/// A timed piece of transcript
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Segment {
    /// Start offset in seconds
    pub start: f32,
    /// End offset in seconds
    pub end: f32,
    /// Transcribed text (may carry leading whitespace)
    pub text: String,
}

/// Converts recorded speech to text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a mono WAV recording into ordered segments
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, wav: &[u8], beam_width: u32) -> Result<Vec<Segment>>;
}

/// Concatenate segment texts in order and trim
#[must_use]
pub fn join_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Timing policy for one utterance capture
#[derive(Debug, Clone)]
pub struct ListenPolicy {
    /// Give up when no speech starts within this window
    pub initial_timeout: Duration,
    /// Trailing silence that ends an utterance
    pub pause: Duration,
    /// Ambient noise measurement before listening
    pub calibration: Duration,
    /// Lower bound for the speech energy threshold
    pub min_energy: f32,
}

impl Default for ListenPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_secs(5),
            pause: Duration::from_millis(800),
            calibration: Duration::from_millis(500),
            min_energy: 0.01,
        }
    }
}

impl From<&ListenConfig> for ListenPolicy {
    fn from(config: &ListenConfig) -> Self {
        Self {
            initial_timeout: config.initial_timeout,
            pause: config.pause,
            calibration: config.calibration,
            min_energy: config.min_energy,
        }
    }
}

impl ListenPolicy {
    /// Energy threshold for speech given the measured noise floor
    #[must_use]
    pub fn speech_threshold(&self, noise_floor: f32) -> f32 {
        (noise_floor * NOISE_MULTIPLIER).max(self.min_energy)
    }
}

/// State of the utterance detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech to start
    Waiting,
    /// Speech started, accumulating
    Speaking,
}

/// Why capture stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing crossed the threshold within the initial timeout
    NoSpeech,
    /// Speech followed by the configured pause
    Complete,
    /// Phrase reached its maximum length
    MaxLength,
}

/// Finds one utterance in a stream of audio chunks
pub struct UtteranceDetector {
    threshold: f32,
    state: DetectorState,
    pre_roll: VecDeque<f32>,
    speech_buffer: Vec<f32>,
    waited: usize,
    phrase: usize,
    silence: usize,
    initial_timeout: usize,
    pause: usize,
    max_phrase: usize,
}

impl UtteranceDetector {
    /// Create a detector
    ///
    /// # Arguments
    ///
    /// * `threshold` - RMS energy above which a chunk counts as speech
    /// * `policy` - Initial timeout and pause lengths
    /// * `max_phrase` - Longest phrase captured
    #[must_use]
    pub fn new(threshold: f32, policy: &ListenPolicy, max_phrase: Duration) -> Self {
        Self {
            threshold,
            state: DetectorState::Waiting,
            pre_roll: VecDeque::with_capacity(PRE_ROLL_SAMPLES),
            speech_buffer: Vec::new(),
            waited: 0,
            phrase: 0,
            silence: 0,
            initial_timeout: samples_for(policy.initial_timeout),
            pause: samples_for(policy.pause),
            max_phrase: samples_for(max_phrase),
        }
    }

    /// Feed the next chunk, returning a verdict once capture should stop
    pub fn process(&mut self, samples: &[f32]) -> Option<Verdict> {
        let energy = rms_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            DetectorState::Waiting => {
                if is_speech {
                    self.state = DetectorState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend(self.pre_roll.drain(..));
                    self.speech_buffer.extend_from_slice(samples);
                    self.phrase = samples.len();
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                } else {
                    self.waited += samples.len();
                    self.pre_roll.extend(samples.iter().copied());
                    let excess = self.pre_roll.len().saturating_sub(PRE_ROLL_SAMPLES);
                    self.pre_roll.drain(..excess);

                    if self.waited >= self.initial_timeout {
                        tracing::trace!(waited = self.waited, "no speech before timeout");
                        return Some(Verdict::NoSpeech);
                    }
                }
            }
            DetectorState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);
                self.phrase += samples.len();

                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                tracing::trace!(
                    phrase = self.phrase,
                    silence = self.silence,
                    is_speech,
                    energy,
                    "speaking state"
                );

                if self.silence >= self.pause {
                    return Some(Verdict::Complete);
                }
            }
        }

        if self.state == DetectorState::Speaking && self.phrase >= self.max_phrase {
            return Some(Verdict::MaxLength);
        }

        None
    }

    /// Take the captured utterance, clearing it
    pub fn take_utterance(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Captures one spoken command and transcribes it
pub struct TranscriptionGate {
    transcriber: Arc<dyn Transcriber>,
    policy: ListenPolicy,
    beam_width: u32,
    scratch_path: PathBuf,
}

impl TranscriptionGate {
    /// Create a gate
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        policy: ListenPolicy,
        beam_width: u32,
        scratch_path: PathBuf,
    ) -> Self {
        Self {
            transcriber,
            policy,
            beam_width,
            scratch_path,
        }
    }

    /// Listen for one utterance and return its transcript
    ///
    /// Returns `None` when nobody spoke, the transcript was empty, or
    /// transcription failed (logged here).
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened or read
    pub async fn listen(
        &self,
        mic: &mut dyn Microphone,
        max_phrase: Duration,
    ) -> Result<Option<String>> {
        tracing::debug!("listening");

        let Some(samples) = self.capture(mic, max_phrase).await? else {
            tracing::debug!("no speech detected");
            return Ok(None);
        };

        match self.transcribe(&samples).await {
            Ok(text) if text.is_empty() => {
                tracing::debug!("empty transcript");
                Ok(None)
            }
            Ok(text) => {
                tracing::info!(user = %text, "heard");
                Ok(Some(text))
            }
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                Ok(None)
            }
        }
    }

    /// Record one utterance; the device is released before this returns
    async fn capture(
        &self,
        mic: &mut dyn Microphone,
        max_phrase: Duration,
    ) -> Result<Option<Vec<f32>>> {
        let mut guard = CaptureGuard::open(mic)?;

        let ambient = guard.read(samples_for(self.policy.calibration)).await?;
        let noise_floor = rms_energy(&ambient);
        let threshold = self.policy.speech_threshold(noise_floor);
        tracing::debug!(noise_floor, threshold, "calibrated for ambient noise");

        let mut detector = UtteranceDetector::new(threshold, &self.policy, max_phrase);

        loop {
            let chunk = guard.read(FRAME_SAMPLES).await?;
            match detector.process(&chunk) {
                None => {}
                Some(Verdict::NoSpeech) => return Ok(None),
                Some(verdict) => {
                    let utterance = detector.take_utterance();
                    tracing::debug!(?verdict, samples = utterance.len(), "utterance captured");
                    return Ok(Some(utterance));
                }
            }
        }
    }

    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        write_scratch(&self.scratch_path, &wav)?;

        let segments = self.transcriber.transcribe(&wav, self.beam_width).await?;
        Ok(join_segments(&segments))
    }
}

/// Verbose transcription response from an OpenAI-compatible server
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl VerboseTranscription {
    /// Servers that ignore `verbose_json` only return `text`
    fn into_segments(self) -> Vec<Segment> {
        if self.segments.is_empty() && !self.text.trim().is_empty() {
            return vec![Segment {
                start: 0.0,
                end: 0.0,
                text: self.text,
            }];
        }
        self.segments
    }
}

/// Transcribes through an OpenAI-compatible `/v1/audio/transcriptions` endpoint
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpTranscriber {
    /// Create a new HTTP transcriber
    ///
    /// # Errors
    ///
    /// Returns error if the URL is empty
    pub fn new(url: String, model: String) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(Error::Config("transcription endpoint URL required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            url,
            model,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &[u8], beam_width: u32) -> Result<Vec<Segment>> {
        tracing::debug!(audio_bytes = wav.len(), beam_width, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("beam_size", beam_width.to_string());

        let response = self.client.post(&self.url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: VerboseTranscription = response.json().await?;
        let segments = result.into_segments();

        tracing::debug!(segments = segments.len(), "transcription complete");
        Ok(segments)
    }
}
