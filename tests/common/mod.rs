//! Shared test utilities
//!
//! Fakes for every collaborator the session talks to, so tests need no audio
//! hardware, network service or speech engine.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aura_assistant::backend::Assistant;
use aura_assistant::voice::{
    Microphone, SAMPLE_RATE, Segment, SpeechEngine, Transcriber, VoiceActivity, WakeScorer,
};
use aura_assistant::{Error, Result};

/// Generate sine wave audio samples
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn sine(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

/// Counters shared between a [`ScriptedMicrophone`] and the test
#[derive(Debug, Default)]
pub struct MicStats {
    pub opens: usize,
    pub closes: usize,
    pub samples_read: usize,
}

/// Microphone that plays back a fixed script, then silence
///
/// Each read sleeps for the audio's real duration, so paused-clock tests see
/// time pass as audio is captured. Opening twice or reading while closed is
/// an error.
pub struct ScriptedMicrophone {
    audio: VecDeque<f32>,
    open: bool,
    stats: Arc<Mutex<MicStats>>,
}

impl ScriptedMicrophone {
    pub fn new(audio: Vec<f32>) -> Self {
        Self {
            audio: audio.into(),
            open: false,
            stats: Arc::new(Mutex::new(MicStats::default())),
        }
    }

    pub fn stats(&self) -> Arc<Mutex<MicStats>> {
        Arc::clone(&self.stats)
    }
}

#[async_trait(?Send)]
impl Microphone for ScriptedMicrophone {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::Audio("microphone already open".to_string()));
        }
        self.open = true;
        self.stats.lock().unwrap().opens += 1;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    async fn read(&mut self, samples: usize) -> Result<Vec<f32>> {
        if !self.open {
            return Err(Error::Audio("microphone is closed".to_string()));
        }

        tokio::time::sleep(Duration::from_secs_f64(samples as f64 / f64::from(SAMPLE_RATE))).await;

        let mut chunk: Vec<f32> = self.audio.drain(..samples.min(self.audio.len())).collect();
        chunk.resize(samples, 0.0);
        self.stats.lock().unwrap().samples_read += samples;
        Ok(chunk)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.stats.lock().unwrap().closes += 1;
        }
    }
}

/// Wake scorer returning a scripted confidence per frame, then zero
pub struct ScriptedScorer {
    phrase: String,
    scores: VecDeque<f32>,
    repeat_last: bool,
}

impl ScriptedScorer {
    pub fn new(phrase: &str, scores: Vec<f32>) -> Self {
        Self {
            phrase: phrase.to_string(),
            scores: scores.into(),
            repeat_last: false,
        }
    }

    /// Return `score` for every frame, forever
    pub fn constant(phrase: &str, score: f32) -> Self {
        Self {
            phrase: phrase.to_string(),
            scores: VecDeque::from([score]),
            repeat_last: true,
        }
    }
}

#[async_trait]
impl WakeScorer for ScriptedScorer {
    async fn predict(&mut self, _frame: &[f32]) -> Result<HashMap<String, f32>> {
        let score = if self.repeat_last {
            self.scores.front().copied().unwrap_or(0.0)
        } else {
            self.scores.pop_front().unwrap_or(0.0)
        };
        Ok(HashMap::from([(self.phrase.clone(), score)]))
    }
}

/// VAD returning a fixed score and counting the windows it saw
pub struct FixedVad {
    pub score: f32,
    pub windows: Arc<Mutex<usize>>,
}

impl FixedVad {
    pub fn new(score: f32) -> Self {
        Self {
            score,
            windows: Arc::new(Mutex::new(0)),
        }
    }
}

impl VoiceActivity for FixedVad {
    fn window_size(&self) -> usize {
        512
    }

    fn score(&mut self, window: &[f32], _sample_rate: u32) -> Result<f32> {
        assert_eq!(window.len(), 512);
        *self.windows.lock().unwrap() += 1;
        Ok(self.score)
    }
}

/// Transcriber replaying scripted transcripts, then empty results
#[derive(Default)]
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Result<String>>>,
    pub calls: Mutex<Vec<usize>>,
}

impl ScriptedTranscriber {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(Error::Stt("model crashed".to_string()))])),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, wav: &[u8], _beam_width: u32) -> Result<Vec<Segment>> {
        self.calls.lock().unwrap().push(wav.len());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))?;

        // Split into two segments the way servers do
        let (first, second) = reply.split_at(reply.len() / 2);
        Ok(vec![
            Segment {
                start: 0.0,
                end: 0.5,
                text: format!(" {first}"),
            },
            Segment {
                start: 0.5,
                end: 1.0,
                text: second.to_string(),
            },
        ])
    }
}

/// Speech engine that records what it was asked to say
pub struct RecordingSpeech {
    pub spoken: Arc<Mutex<Vec<String>>>,
}

impl RecordingSpeech {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let spoken = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                spoken: Arc::clone(&spoken),
            },
            spoken,
        )
    }
}

#[async_trait]
impl SpeechEngine for RecordingSpeech {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn say(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Assistant with a fixed reply that records prompts
pub struct FakeAssistant {
    pub reply: String,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeAssistant {
    pub fn new(reply: &str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                reply: reply.to_string(),
                prompts: Arc::clone(&prompts),
            },
            prompts,
        )
    }
}

#[async_trait]
impl Assistant for FakeAssistant {
    async fn think(&mut self, prompt: &str) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}

/// Microphone whose device cannot be opened
pub struct BrokenMicrophone;

#[async_trait(?Send)]
impl Microphone for BrokenMicrophone {
    fn open(&mut self) -> Result<()> {
        Err(Error::Audio("device unplugged".to_string()))
    }

    async fn read(&mut self, _samples: usize) -> Result<Vec<f32>> {
        Err(Error::Audio("device unplugged".to_string()))
    }

    fn close(&mut self) {}
}

/// Microphone that opens normally a fixed number of times, then fails
pub struct FlakyMicrophone {
    inner: ScriptedMicrophone,
    good_opens: usize,
    attempts: Arc<Mutex<usize>>,
}

impl FlakyMicrophone {
    pub fn new(audio: Vec<f32>, good_opens: usize) -> Self {
        Self {
            inner: ScriptedMicrophone::new(audio),
            good_opens,
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Open attempts so far, successful or not
    pub fn attempts(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.attempts)
    }
}

#[async_trait(?Send)]
impl Microphone for FlakyMicrophone {
    fn open(&mut self) -> Result<()> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            *attempts
        };
        if attempt > self.good_opens {
            return Err(Error::Audio("device disappeared".to_string()));
        }
        self.inner.open()
    }

    async fn read(&mut self, samples: usize) -> Result<Vec<f32>> {
        self.inner.read(samples).await
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
