//! Voice pipeline integration tests
//!
//! Tests wake confirmation, utterance capture and speech output without
//! audio hardware. Capture tests run on a paused clock.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aura_assistant::Config;
use aura_assistant::config::file::parse_config_file;
use aura_assistant::daemon::build_speech;
use aura_assistant::voice::{
    EnergyVad, ListenPolicy, SAMPLE_RATE, SpeechOutput, TranscriptionGate, WakeConfirmer,
    WakeProfile, samples_to_wav,
};

mod common;

use common::{
    BrokenMicrophone, FixedVad, RecordingSpeech, ScriptedMicrophone, ScriptedScorer,
    ScriptedTranscriber, silence, sine,
};

fn profile() -> WakeProfile {
    WakeProfile {
        phrases: vec!["hey aura".to_string()],
        activation_threshold: 0.5,
        sample_window: 1280,
    }
}

fn gate(transcriber: &Arc<ScriptedTranscriber>, scratch: PathBuf) -> TranscriptionGate {
    TranscriptionGate::new(Arc::clone(transcriber) as _, ListenPolicy::default(), 5, scratch)
}

fn wav_samples(path: &std::path::Path) -> u32 {
    let reader = hound::WavReader::open(path).unwrap();
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 1);
    reader.duration()
}

#[tokio::test(start_paused = true)]
async fn test_wake_confirmed_by_scorer_and_vad() {
    let mut mic = ScriptedMicrophone::new(silence(5.0));
    let stats = mic.stats();
    let vad = FixedVad::new(0.9);
    let windows = Arc::clone(&vad.windows);

    let mut confirmer = WakeConfirmer::new(
        profile(),
        Box::new(ScriptedScorer::new("hey aura", vec![0.2, 0.9])),
        Box::new(vad),
        0.5,
    );

    let event = confirmer.wait_for_wake(&mut mic).await.unwrap();

    assert_eq!(event.phrase, "hey aura");
    assert!((event.confidence - 0.9).abs() < f32::EPSILON);
    assert_eq!(*windows.lock().unwrap(), 3);

    let stats = stats.lock().unwrap();
    assert_eq!(stats.samples_read, 2 * 1280);
    assert_eq!((stats.opens, stats.closes), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_wake_never_fires_at_threshold() {
    let mut mic = ScriptedMicrophone::new(sine(440.0, 60.0, 0.3));
    let stats = mic.stats();
    let vad = FixedVad::new(1.0);
    let windows = Arc::clone(&vad.windows);

    let mut confirmer = WakeConfirmer::new(
        profile(),
        Box::new(ScriptedScorer::constant("hey aura", 0.5)),
        Box::new(vad),
        0.5,
    );

    let result =
        tokio::time::timeout(Duration::from_secs(30), confirmer.wait_for_wake(&mut mic)).await;

    assert!(result.is_err(), "confidence at the threshold must not wake");
    assert_eq!(*windows.lock().unwrap(), 0);
    // Dropping the scan released the device
    assert_eq!(stats.lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_wake_suppressed_without_voice_activity() {
    let mut mic = ScriptedMicrophone::new(Vec::new());
    let vad = FixedVad::new(0.49);
    let windows = Arc::clone(&vad.windows);

    let mut confirmer = WakeConfirmer::new(
        profile(),
        Box::new(ScriptedScorer::constant("hey aura", 0.99)),
        Box::new(vad),
        0.5,
    );

    let result =
        tokio::time::timeout(Duration::from_secs(10), confirmer.wait_for_wake(&mut mic)).await;

    assert!(result.is_err(), "high confidence alone must not wake");
    let windows = *windows.lock().unwrap();
    assert!(windows >= 3);
    assert_eq!(windows % 3, 0, "every candidate frame checks three sub-windows");
}

#[tokio::test(start_paused = true)]
async fn test_energy_vad_confirms_on_trailing_speech() {
    let mut audio = silence(1.0);
    audio.extend(sine(440.0, 1.0, 0.3));
    let mut mic = ScriptedMicrophone::new(audio);
    let stats = mic.stats();

    let mut confirmer = WakeConfirmer::new(
        profile(),
        Box::new(ScriptedScorer::constant("hey aura", 0.9)),
        Box::new(EnergyVad::new(0.02).unwrap()),
        0.5,
    );

    let event = confirmer.wait_for_wake(&mut mic).await.unwrap();

    assert!(event.vad_score > 0.5);
    // Frame 13 is the first one whose trailing half holds the tone
    assert_eq!(stats.lock().unwrap().samples_read, 13 * 1280);
}

#[tokio::test(start_paused = true)]
async fn test_listen_transcribes_after_pause() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch.wav");

    let mut audio = silence(0.5);
    audio.extend(sine(440.0, 1.0, 0.3));
    audio.extend(silence(2.0));
    let mut mic = ScriptedMicrophone::new(audio);
    let stats = mic.stats();

    let transcriber = Arc::new(ScriptedTranscriber::new(vec!["What time is it? "]));
    let gate = gate(&transcriber, scratch.clone());

    let text = gate.listen(&mut mic, Duration::from_secs(10)).await.unwrap();

    assert_eq!(text.as_deref(), Some("What time is it?"));
    assert_eq!(transcriber.call_count(), 1);
    // 13 frames of tone, then 10 frames (0.8s) of trailing silence
    assert_eq!(wav_samples(&scratch), 23 * 1280);

    let stats = stats.lock().unwrap();
    assert_eq!((stats.opens, stats.closes), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_listen_without_speech_skips_transcription() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch.wav");

    let mut mic = ScriptedMicrophone::new(silence(10.0));
    let stats = mic.stats();
    let transcriber = Arc::new(ScriptedTranscriber::new(vec!["never used"]));
    let gate = gate(&transcriber, scratch.clone());

    let started = tokio::time::Instant::now();
    let text = gate.listen(&mut mic, Duration::from_secs(10)).await.unwrap();

    assert!(text.is_none());
    assert_eq!(transcriber.call_count(), 0);
    assert!(!scratch.exists());
    assert!(started.elapsed() >= Duration::from_millis(5500));
    assert!(started.elapsed() < Duration::from_secs(7));
    assert_eq!(stats.lock().unwrap().closes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_listen_stops_at_max_phrase() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch.wav");

    let mut audio = silence(0.5);
    audio.extend(sine(300.0, 20.0, 0.3));
    let mut mic = ScriptedMicrophone::new(audio);
    let transcriber = Arc::new(ScriptedTranscriber::new(vec!["and another thing"]));
    let gate = gate(&transcriber, scratch.clone());

    let text = gate.listen(&mut mic, Duration::from_secs(2)).await.unwrap();

    assert_eq!(text.as_deref(), Some("and another thing"));
    assert_eq!(wav_samples(&scratch), 32000);
}

#[tokio::test(start_paused = true)]
async fn test_empty_transcript_is_no_speech() {
    let dir = tempfile::tempdir().unwrap();

    let mut audio = silence(0.5);
    audio.extend(sine(440.0, 1.0, 0.3));
    let mut mic = ScriptedMicrophone::new(audio);
    let transcriber = Arc::new(ScriptedTranscriber::new(vec!["   "]));
    let gate = gate(&transcriber, dir.path().join("scratch.wav"));

    assert!(gate.listen(&mut mic, Duration::from_secs(10)).await.unwrap().is_none());
    assert_eq!(transcriber.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transcription_failure_is_absorbed() {
    let dir = tempfile::tempdir().unwrap();

    let mut audio = silence(0.5);
    audio.extend(sine(440.0, 1.0, 0.3));
    let mut mic = ScriptedMicrophone::new(audio);
    let stats = mic.stats();
    let transcriber = Arc::new(ScriptedTranscriber::failing());
    let gate = gate(&transcriber, dir.path().join("scratch.wav"));

    assert!(gate.listen(&mut mic, Duration::from_secs(10)).await.unwrap().is_none());
    assert_eq!(stats.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn test_listen_reports_device_failure() {
    let dir = tempfile::tempdir().unwrap();
    let transcriber = Arc::new(ScriptedTranscriber::new(vec!["never used"]));
    let gate = gate(&transcriber, dir.path().join("scratch.wav"));

    let result = gate.listen(&mut BrokenMicrophone, Duration::from_secs(10)).await;

    assert!(result.is_err());
    assert_eq!(transcriber.call_count(), 0);
}

#[tokio::test]
async fn test_speak_empty_text_calls_no_engine() {
    let (primary, primary_log) = RecordingSpeech::new();
    let (secondary, secondary_log) = RecordingSpeech::new();
    let output = SpeechOutput::new(Box::new(primary), vec![Box::new(secondary)]);

    output.speak("").await;
    output.speak("  \n ").await;
    output.speak("\"\"").await;

    assert!(primary_log.lock().unwrap().is_empty());
    assert!(secondary_log.lock().unwrap().is_empty());

    output.speak("**Done.**").await;
    assert_eq!(*primary_log.lock().unwrap(), vec!["Done."]);
}

#[test]
fn test_samples_to_wav() {
    let samples = sine(440.0, 0.1, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(reader.duration() as usize, samples.len());
}

#[test]
fn test_speech_chain_starts_with_system_command() {
    let file = parse_config_file("[speech]\nnative_fallback = false").unwrap();
    let config = Config::from_file(file, PathBuf::from("/tmp/aura-test")).unwrap();

    let output = build_speech(config.speech).unwrap();

    assert_eq!(output.engines(), vec!["system"]);
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
#[test]
fn test_default_chain_skips_missing_native_engine() {
    let file = parse_config_file("").unwrap();
    let config = Config::from_file(file, PathBuf::from("/tmp/aura-test")).unwrap();
    assert!(config.speech.native_fallback);

    let output = build_speech(config.speech).unwrap();

    assert_eq!(output.engines(), vec!["system"]);
}
