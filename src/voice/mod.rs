//! Voice processing module
//!
//! Handles audio capture, wake confirmation, utterance transcription and
//! speech output. Every capture phase borrows the single [`Microphone`]
//! exclusively and releases it before returning.

mod capture;
mod native;
mod playback;
mod speech;
mod transcription;
mod tts;
mod wake_word;

pub use capture::{
    AudioCapture, CaptureGuard, FRAME_SAMPLES, Microphone, SAMPLE_RATE, rms_energy, samples_for,
    samples_to_wav, write_scratch,
};
pub use native::NativeSpeech;
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use speech::{
    Platform, SpeechCommand, SpeechEngine, SpeechOutput, SynthesizedSpeech, SystemSpeech,
    sanitize, speech_command,
};
pub use transcription::{
    DetectorState, HttpTranscriber, ListenPolicy, Segment, TranscriptionGate, Transcriber,
    UtteranceDetector, Verdict, join_segments,
};
pub use tts::TextToSpeech;
pub use wake_word::{
    EnergyVad, TranscriptWakeScorer, VAD_WINDOW_SAMPLES, VoiceActivity, WakeConfirmer, WakeEvent,
    WakeProfile, WakeScorer, window_starts,
};
