//! Wake phrase confirmation
//!
//! A frame only wakes the assistant when the wake scorer is confident AND a
//! voice activity detector agrees that the frame holds speech. Scorers alone
//! fire on ambient noise; the VAD check filters those out.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;

use super::capture::{CaptureGuard, Microphone, SAMPLE_RATE, rms_energy, samples_to_wav};
use super::transcription::{Transcriber, join_segments};
use crate::config::WakeConfig;
use crate::{Error, Result};

/// Rolling audio kept by [`TranscriptWakeScorer`] (1.5 seconds)
const TRANSCRIPT_WINDOW_SAMPLES: usize = 24000;

/// Minimum frames between two transcriptions of the rolling window
const TRANSCRIBE_EVERY_FRAMES: usize = 6;

/// Window size [`EnergyVad`] scores (32ms at 16kHz)
pub const VAD_WINDOW_SAMPLES: usize = 512;

/// Wake phrases and thresholds, fixed after startup
#[derive(Debug, Clone)]
pub struct WakeProfile {
    /// Registered phrase identifiers
    pub phrases: Vec<String>,
    /// Confidence a phrase must exceed
    pub activation_threshold: f32,
    /// Samples per frame handed to the scorer
    pub sample_window: usize,
}

impl From<&WakeConfig> for WakeProfile {
    fn from(config: &WakeConfig) -> Self {
        Self {
            phrases: config.phrases.clone(),
            activation_threshold: config.activation_threshold,
            sample_window: config.frame_samples,
        }
    }
}

/// Scores frames for each registered wake phrase
#[async_trait]
pub trait WakeScorer: Send {
    /// Confidence in `[0, 1]` per phrase for this frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame could not be scored
    async fn predict(&mut self, frame: &[f32]) -> Result<HashMap<String, f32>>;

    /// Forget audio from any previous scan
    fn reset(&mut self) {}
}

/// Judges whether a fixed-size window holds speech
pub trait VoiceActivity: Send {
    /// The only window length `score` accepts
    fn window_size(&self) -> usize;

    /// Speech probability in `[0, 1]`
    ///
    /// # Errors
    ///
    /// Returns error if the window is not exactly `window_size()` samples
    fn score(&mut self, window: &[f32], sample_rate: u32) -> Result<f32>;
}

/// A confirmed wake
#[derive(Debug, Clone, PartialEq)]
pub struct WakeEvent {
    pub phrase: String,
    pub confidence: f32,
    pub vad_score: f32,
}

/// Scans the microphone until a wake phrase is confirmed
pub struct WakeConfirmer {
    profile: WakeProfile,
    scorer: Box<dyn WakeScorer>,
    vad: Box<dyn VoiceActivity>,
    speech_threshold: f32,
}

impl WakeConfirmer {
    /// Create a confirmer
    ///
    /// `speech_threshold` is the VAD probability at least one sub-window of a
    /// candidate frame must exceed.
    #[must_use]
    pub fn new(
        profile: WakeProfile,
        scorer: Box<dyn WakeScorer>,
        vad: Box<dyn VoiceActivity>,
        speech_threshold: f32,
    ) -> Self {
        tracing::debug!(
            phrases = ?profile.phrases,
            threshold = profile.activation_threshold,
            "wake confirmer initialized"
        );

        Self {
            profile,
            scorer,
            vad,
            speech_threshold,
        }
    }

    /// Block until a wake phrase is heard and corroborated by the VAD
    ///
    /// The microphone is held for the whole scan and closed before this
    /// returns. Scorer failures are logged and the scan continues.
    ///
    /// # Errors
    ///
    /// Returns error only if the microphone fails
    pub async fn wait_for_wake(&mut self, mic: &mut dyn Microphone) -> Result<WakeEvent> {
        self.scorer.reset();
        let mut guard = CaptureGuard::open(mic)?;

        loop {
            let frame = guard.read(self.profile.sample_window).await?;

            let scores = match self.scorer.predict(&frame).await {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::warn!(error = %e, "wake scoring failed");
                    continue;
                }
            };

            let Some((phrase, confidence)) = self.candidate(&scores) else {
                continue;
            };

            let vad_score = self.corroborate(&frame)?;
            if vad_score > self.speech_threshold {
                drop(guard);
                tracing::info!(phrase = %phrase, confidence, vad_score, "wake confirmed");
                return Ok(WakeEvent {
                    phrase,
                    confidence,
                    vad_score,
                });
            }

            tracing::debug!(
                phrase = %phrase,
                confidence,
                vad_score,
                "wake rejected, no voice activity"
            );
        }
    }

    /// Most confident phrase above the activation threshold
    fn candidate(&self, scores: &HashMap<String, f32>) -> Option<(String, f32)> {
        scores
            .iter()
            .filter(|(_, confidence)| **confidence > self.profile.activation_threshold)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(phrase, confidence)| (phrase.clone(), *confidence))
    }

    /// Best VAD score over the leading, second and trailing sub-windows
    fn corroborate(&mut self, frame: &[f32]) -> Result<f32> {
        let window = self.vad.window_size();

        let padded;
        let frame = if frame.len() < window {
            let mut extended = frame.to_vec();
            extended.resize(window, 0.0);
            padded = extended;
            padded.as_slice()
        } else {
            frame
        };

        let mut best = 0.0f32;
        for start in window_starts(frame.len(), window) {
            let score = self.vad.score(&frame[start..start + window], SAMPLE_RATE)?;
            best = best.max(score);
        }
        Ok(best)
    }
}

/// Start offsets of the VAD sub-windows for a frame of `len` samples
///
/// First window, the window right after it, and the trailing window, with
/// duplicates removed when the frame is short.
#[must_use]
pub fn window_starts(len: usize, window: usize) -> Vec<usize> {
    if window == 0 || len < window {
        return Vec::new();
    }

    let last = len - window;
    let mut starts = vec![0, window.min(last), last];
    starts.dedup();
    starts
}

/// Energy based voice activity over fixed 512-sample windows
///
/// RMS energy is mapped through a logistic curve centered on `center`, so a
/// window exactly at the center scores 0.5.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    center: f32,
}

impl EnergyVad {
    /// Create a detector centered on an RMS energy level
    ///
    /// # Errors
    ///
    /// Returns error if `center` is not positive
    pub fn new(center: f32) -> Result<Self> {
        if center.is_nan() || center <= 0.0 {
            return Err(Error::WakeWord(format!("VAD energy must be positive, got {center}")));
        }
        Ok(Self { center })
    }
}

impl VoiceActivity for EnergyVad {
    fn window_size(&self) -> usize {
        VAD_WINDOW_SAMPLES
    }

    fn score(&mut self, window: &[f32], sample_rate: u32) -> Result<f32> {
        if window.len() != VAD_WINDOW_SAMPLES {
            return Err(Error::WakeWord(format!(
                "VAD window must be {VAD_WINDOW_SAMPLES} samples, got {}",
                window.len()
            )));
        }
        if sample_rate != SAMPLE_RATE {
            return Err(Error::WakeWord(format!(
                "VAD expects {SAMPLE_RATE}Hz audio, got {sample_rate}Hz"
            )));
        }

        let steepness = 4.0 / self.center;
        let energy = rms_energy(window);
        Ok(1.0 / (1.0 + (-(energy - self.center) * steepness).exp()))
    }
}

/// Wake scorer that transcribes a rolling window and looks for the phrases
///
/// Transcription only runs while the incoming frame carries voice energy,
/// and at most once every few frames.
pub struct TranscriptWakeScorer {
    transcriber: Arc<dyn Transcriber>,
    phrases: Vec<(String, String)>,
    energy_gate: f32,
    beam_width: u32,
    window: VecDeque<f32>,
    frames_since: usize,
}

impl TranscriptWakeScorer {
    /// Create a scorer for the given phrases
    ///
    /// # Arguments
    ///
    /// * `energy_gate` - Frame RMS energy below which no transcription is attempted
    #[must_use]
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        phrases: &[String],
        energy_gate: f32,
        beam_width: u32,
    ) -> Self {
        Self {
            transcriber,
            phrases: phrases
                .iter()
                .map(|p| (p.clone(), normalize(p)))
                .collect(),
            energy_gate,
            beam_width,
            window: VecDeque::with_capacity(TRANSCRIPT_WINDOW_SAMPLES),
            frames_since: TRANSCRIBE_EVERY_FRAMES,
        }
    }

    fn zero_scores(&self) -> HashMap<String, f32> {
        self.phrases.iter().map(|(id, _)| (id.clone(), 0.0)).collect()
    }
}

#[async_trait]
impl WakeScorer for TranscriptWakeScorer {
    async fn predict(&mut self, frame: &[f32]) -> Result<HashMap<String, f32>> {
        self.window.extend(frame.iter().copied());
        let excess = self.window.len().saturating_sub(TRANSCRIPT_WINDOW_SAMPLES);
        self.window.drain(..excess);
        self.frames_since += 1;

        if rms_energy(frame) <= self.energy_gate || self.frames_since < TRANSCRIBE_EVERY_FRAMES {
            return Ok(self.zero_scores());
        }
        self.frames_since = 0;

        let audio: Vec<f32> = self.window.iter().copied().collect();
        let wav = samples_to_wav(&audio, SAMPLE_RATE)?;
        let segments = self.transcriber.transcribe(&wav, self.beam_width).await?;
        let heard = normalize(&join_segments(&segments));
        tracing::trace!(heard = %heard, "wake window transcribed");

        Ok(self
            .phrases
            .iter()
            .map(|(id, phrase)| {
                let score = if contains_phrase(&heard, phrase) { 1.0 } else { 0.0 };
                (id.clone(), score)
            })
            .collect())
    }

    fn reset(&mut self) {
        self.window.clear();
        self.frames_since = TRANSCRIBE_EVERY_FRAMES;
    }
}

/// Lowercase, punctuation to spaces, single spaced
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whole-word containment of a normalized phrase
fn contains_phrase(heard: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {heard} ").contains(&format!(" {phrase} "))
}
