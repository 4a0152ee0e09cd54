//! Aura - a local voice assistant
//!
//! This library provides the core of the assistant:
//! - Wake phrase confirmation (scorer plus voice activity check)
//! - Utterance capture and transcription
//! - A conversation backend for an Ollama-style inference server
//! - Speech output with in-process and HTTP fallback engines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 DormancyController                  │
//! │      Dormant  ──wake──▶  Active  ──▶  Terminating   │
//! └──────┬──────────────┬──────────────┬──────────┬─────┘
//!        │              │              │          │
//! ┌──────▼──────┐ ┌─────▼──────┐ ┌─────▼─────┐ ┌──▼──────────┐
//! │WakeConfirmer│ │Transcription│ │Conversation│ │SpeechOutput │
//! │ scorer + VAD│ │    Gate     │ │  Backend   │ │ OS ▸ native │
//! └─────────────┘ └─────────────┘ └────────────┘ └─────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod voice;

pub use backend::{Assistant, BackendStatus, ConversationBackend, ConversationMode};
pub use config::Config;
pub use controller::{DormancyController, SessionState};
pub use daemon::Daemon;
pub use error::{Error, Result};
