//! In-process speech through the platform synthesizer
//!
//! Windows (SAPI / `WinRT`) and macOS (`AVSpeechSynthesizer`) speak in-process
//! through the `tts` crate. The synthesizer lives on its own thread because
//! the platform handles are not `Send`; requests reach it over a channel.

use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::speech::SpeechEngine;
use crate::{Error, Result};

type Request = (String, oneshot::Sender<Result<()>>);

/// Fallback engine speaking through the platform synthesizer in-process
pub struct NativeSpeech {
    requests: mpsc::Sender<Request>,
    timeout: Duration,
}

impl NativeSpeech {
    /// Start the synthesizer thread
    ///
    /// # Errors
    ///
    /// Returns error if this platform has no in-process synthesizer or it
    /// fails to initialize
    pub fn new(voice: &str, timeout: Duration) -> Result<Self> {
        let requests = platform::start(voice)?;
        tracing::debug!(voice, "native speech initialized");
        Ok(Self { requests, timeout })
    }
}

#[async_trait]
impl SpeechEngine for NativeSpeech {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn say(&self, text: &str) -> Result<()> {
        let (done, spoken) = oneshot::channel();
        self.requests
            .send((text.to_string(), done))
            .map_err(|_| Error::Tts("native speech thread stopped".to_string()))?;

        let spoken = tokio::time::timeout(self.timeout, spoken).await.map_err(|_| {
            Error::Tts(format!("native speech timed out after {:?}", self.timeout))
        })?;
        spoken.map_err(|_| Error::Tts("native speech thread stopped".to_string()))?
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
mod platform {
    use std::sync::mpsc;
    use std::time::Duration;

    use tts::{Gender, Tts};

    use super::Request;
    use crate::{Error, Result};

    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn start(voice: &str) -> Result<mpsc::Sender<Request>> {
        let (requests, incoming) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let voice = voice.trim().to_lowercase();

        std::thread::Builder::new()
            .name("native-speech".to_string())
            .spawn(move || {
                let mut tts = match Tts::default() {
                    Ok(tts) => tts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Tts(e.to_string())));
                        return;
                    }
                };
                select_voice(&mut tts, &voice);
                let _ = ready_tx.send(Ok(()));

                for (text, done) in incoming {
                    let _ = done.send(speak_blocking(&mut tts, &text));
                }
            })?;

        ready_rx
            .recv()
            .map_err(|_| Error::Tts("native speech thread exited".to_string()))??;
        Ok(requests)
    }

    fn select_voice(tts: &mut Tts, hint: &str) {
        let wanted = match hint {
            "female" => Gender::Female,
            "male" => Gender::Male,
            _ => return,
        };

        let Ok(voices) = tts.voices() else {
            return;
        };
        if let Some(voice) = voices.iter().find(|v| v.gender() == Some(wanted)) {
            if let Err(e) = tts.set_voice(voice) {
                tracing::debug!(error = %e, "could not select native voice");
            }
        }
    }

    fn speak_blocking(tts: &mut Tts, text: &str) -> Result<()> {
        tts.speak(text, true).map_err(|e| Error::Tts(e.to_string()))?;

        // speak() returns as soon as the utterance is queued
        while tts.is_speaking().map_err(|e| Error::Tts(e.to_string()))? {
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
mod platform {
    use std::sync::mpsc;

    use super::Request;
    use crate::{Error, Result};

    pub fn start(_voice: &str) -> Result<mpsc::Sender<Request>> {
        Err(Error::Tts("no in-process speech synthesizer on this platform".to_string()))
    }
}
