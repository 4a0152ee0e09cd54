//! Dormancy controller
//!
//! The top-level state machine. While dormant it waits for a confirmed wake
//! phrase; while active it runs listen, think and speak turns until the
//! interaction timer runs out or a shutdown word is heard.
//!
//! ```text
//!   Dormant ──wake──▶ Active ──shutdown word──▶ Terminating
//!      ▲                 │
//!      └────timeout──────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::backend::Assistant;
use crate::config::{ListenConfig, SessionConfig};
use crate::voice::{Microphone, SpeechOutput, TranscriptionGate, WakeConfirmer};

/// Session state, owned by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the wake phrase
    Dormant,
    /// In conversation
    Active,
    /// Shut down, the loop has ended
    Terminating,
}

/// Time since the last interaction
#[derive(Debug, Clone)]
pub struct InteractionTimer {
    last_interaction: Instant,
    timeout: Duration,
}

impl InteractionTimer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_interaction: Instant::now(),
            timeout,
        }
    }

    /// Mark an interaction now
    pub fn reset(&mut self) {
        self.last_interaction = Instant::now();
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.last_interaction.elapsed()
    }

    /// Strictly more than the timeout has passed since the last interaction
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }
}

/// Session behavior
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Idle time after which the session goes dormant
    pub dormancy_timeout: Duration,
    /// Pause before every wake scan so the assistant does not hear itself
    pub anti_echo: Duration,
    /// Any of these inside a transcript ends the session
    pub shutdown_words: Vec<String>,
    /// Spoken on wake
    pub wake_ack: String,
    /// Spoken on shutdown
    pub farewell: String,
    /// Longest utterance captured per turn
    pub max_phrase: Duration,
}

impl SessionPolicy {
    #[must_use]
    pub fn from_config(session: &SessionConfig, listen: &ListenConfig) -> Self {
        Self {
            dormancy_timeout: session.dormancy_timeout,
            anti_echo: session.anti_echo,
            shutdown_words: session.shutdown_words.clone(),
            wake_ack: session.wake_ack.clone(),
            farewell: session.farewell.clone(),
            max_phrase: listen.max_phrase,
        }
    }
}

/// Case-insensitive substring match against the shutdown vocabulary
#[must_use]
pub fn is_shutdown_command(transcript: &str, words: &[String]) -> bool {
    let transcript = transcript.to_lowercase();
    words
        .iter()
        .map(|w| w.trim().to_lowercase())
        .any(|w| !w.is_empty() && transcript.contains(&w))
}

/// Runs the assistant session
pub struct DormancyController {
    state: SessionState,
    timer: InteractionTimer,
    policy: SessionPolicy,
    mic: Box<dyn Microphone>,
    wake: WakeConfirmer,
    gate: TranscriptionGate,
    assistant: Box<dyn Assistant>,
    speech: SpeechOutput,
}

impl DormancyController {
    /// Create a controller in the dormant state
    #[must_use]
    pub fn new(
        policy: SessionPolicy,
        mic: Box<dyn Microphone>,
        wake: WakeConfirmer,
        gate: TranscriptionGate,
        assistant: Box<dyn Assistant>,
        speech: SpeechOutput,
    ) -> Self {
        Self {
            state: SessionState::Dormant,
            timer: InteractionTimer::new(policy.dormancy_timeout),
            policy,
            mic,
            wake,
            gate,
            assistant,
            speech,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Interaction timer
    #[must_use]
    pub const fn timer(&self) -> &InteractionTimer {
        &self.timer
    }

    /// Run until a shutdown word is heard
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self) {
        tracing::info!(state = ?self.state, "session started");
        while self.step().await != SessionState::Terminating {}
        tracing::info!("session ended");
    }

    /// Run one iteration of the loop and return the resulting state
    ///
    /// Dormant: one wake scan. Active: a timeout check, then one turn.
    #[allow(clippy::future_not_send)]
    pub async fn step(&mut self) -> SessionState {
        match self.state {
            SessionState::Dormant => self.wait_for_wake().await,
            SessionState::Active => self.take_turn().await,
            SessionState::Terminating => {}
        }
        self.state
    }

    #[allow(clippy::future_not_send)]
    async fn wait_for_wake(&mut self) {
        tokio::time::sleep(self.policy.anti_echo).await;

        match self.wake.wait_for_wake(self.mic.as_mut()).await {
            Ok(_) => {
                self.speech.speak(&self.policy.wake_ack).await;
                self.timer.reset();
                self.transition(SessionState::Active);
            }
            Err(e) => {
                tracing::warn!(error = %e, "wake scan failed");
            }
        }
    }

    #[allow(clippy::future_not_send)]
    async fn take_turn(&mut self) {
        if self.timer.is_expired() {
            tracing::debug!(idle = ?self.timer.elapsed(), "no interaction within timeout");
            self.transition(SessionState::Dormant);
            return;
        }

        let transcript = match self.gate.listen(self.mic.as_mut(), self.policy.max_phrase).await {
            Ok(Some(transcript)) => transcript,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "audio capture failed");
                tokio::time::sleep(self.policy.anti_echo).await;
                return;
            }
        };
        self.timer.reset();

        if is_shutdown_command(&transcript, &self.policy.shutdown_words) {
            self.speech.speak(&self.policy.farewell).await;
            self.transition(SessionState::Terminating);
            return;
        }

        let reply = self.assistant.think(&transcript).await;
        tracing::info!(assistant = %reply, "replied");
        self.speech.speak(&reply).await;
        self.timer.reset();
    }

    fn transition(&mut self, next: SessionState) {
        tracing::info!(from = ?self.state, to = ?next, "session state changed");
        self.state = next;
    }
}
