//! Configuration layering tests

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::ExposeSecret;

use aura_assistant::config::file::{load_config_file, parse_config_file};
use aura_assistant::voice::ListenPolicy;
use aura_assistant::{Config, ConversationMode};

fn data_dir() -> PathBuf {
    PathBuf::from("/tmp/aura-test")
}

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults() {
    let config = Config::from_file(parse_config_file("").unwrap(), data_dir()).unwrap();

    assert_eq!(config.backend.url, "http://localhost:11434");
    assert_eq!(config.backend.model, "llama3.1");
    assert_eq!(config.backend.mode, ConversationMode::Chat);
    assert_eq!(config.backend.request_timeout, Some(Duration::from_secs(120)));
    assert_eq!(config.wake.phrases, vec!["hey aura"]);
    assert_eq!(config.wake.frame_samples, 1280);
    assert_eq!(config.listen.pause, Duration::from_millis(800));
    assert_eq!(ListenPolicy::from(&config.listen).pause, ListenPolicy::default().pause);
    assert_eq!(config.listen.scratch_path, data_dir().join("scratch.wav"));
    assert_eq!(config.session.dormancy_timeout, Duration::from_secs(30));
    assert_eq!(config.session.anti_echo, Duration::from_secs(1));
    assert_eq!(config.session.shutdown_words, vec!["quit", "exit", "shutdown"]);
    assert!(config.speech.fallback_url.is_none());
    assert!(config.speech.native_fallback);
}

#[test]
fn test_file_is_partial_overlay() {
    let file = parse_config_file(
        r#"
        [backend]
        model = "mistral"
        mode = "generate"
        request_timeout_secs = 0

        [wake]
        phrases = ["computer", "hey aura"]

        [listen]
        pause_secs = 1.5

        [session]
        dormancy_timeout_secs = 45
        farewell = "See you."

        [speech]
        native_fallback = false
        fallback_url = "http://localhost:8880/v1/audio/speech"
        fallback_api_key = "sk-test"
        "#,
    )
    .unwrap();
    let config = Config::from_file(file, data_dir()).unwrap();

    assert_eq!(config.backend.model, "mistral");
    assert_eq!(config.backend.url, "http://localhost:11434");
    assert_eq!(config.backend.mode, ConversationMode::Generate);
    assert_eq!(config.backend.request_timeout, None);
    assert_eq!(config.wake.phrases, vec!["computer", "hey aura"]);
    assert_eq!(config.listen.pause, Duration::from_millis(1500));
    assert_eq!(config.listen.calibration, Duration::from_millis(500));
    assert_eq!(config.session.dormancy_timeout, Duration::from_secs(45));
    assert_eq!(config.session.farewell, "See you.");
    assert_eq!(config.session.wake_ack, "Online.");
    assert!(!config.speech.native_fallback);
    assert_eq!(
        config.speech.fallback_api_key.as_ref().map(|k| k.expose_secret().to_string()),
        Some("sk-test".to_string())
    );
}

#[test]
fn test_invalid_values_rejected() {
    let bad_mode = parse_config_file("[backend]\nmode = \"stream\"").unwrap();
    assert!(Config::from_file(bad_mode, data_dir()).is_err());

    let bad_threshold = parse_config_file("[wake]\nactivation_threshold = 1.5").unwrap();
    assert!(Config::from_file(bad_threshold, data_dir()).is_err());

    let no_phrase = parse_config_file("[wake]\nphrases = [\"  \"]").unwrap();
    assert!(Config::from_file(no_phrase, data_dir()).is_err());

    assert!(parse_config_file("[backend]\nmodel = 3").is_err());
}

#[test]
fn test_env_overrides() {
    let mut config = Config::from_file(parse_config_file("").unwrap(), data_dir()).unwrap();

    config
        .apply_env(env(&[
            ("OLLAMA_HOST", "192.168.1.20:11434"),
            ("AURA_MODEL", "qwen2.5:7b"),
            ("AURA_BACKEND_MODE", "generate"),
            ("AURA_WAKE_PHRASE", "jarvis"),
            ("AURA_DORMANCY_TIMEOUT", "90"),
            ("OPENAI_API_KEY", "sk-env"),
        ]))
        .unwrap();

    assert_eq!(config.backend.url, "http://192.168.1.20:11434");
    assert_eq!(config.backend.model, "qwen2.5:7b");
    assert_eq!(config.backend.mode, ConversationMode::Generate);
    assert_eq!(config.wake.phrases, vec!["jarvis"]);
    assert_eq!(config.session.dormancy_timeout, Duration::from_secs(90));
    assert!(config.speech.fallback_api_key.is_some());
}

#[test]
fn test_invalid_env_override_rejected() {
    let mut config = Config::from_file(parse_config_file("").unwrap(), data_dir()).unwrap();
    assert!(config.apply_env(env(&[("AURA_DORMANCY_TIMEOUT", "soon")])).is_err());
    assert!(config.apply_env(env(&[("AURA_BACKEND_MODE", "telepathy")])).is_err());
}

#[test]
fn test_explicit_config_path_must_load() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(load_config_file(Some(&missing)).is_err());

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "[backend\nmodel = ").unwrap();
    assert!(load_config_file(Some(&broken)).is_err());

    let good = dir.path().join("good.toml");
    std::fs::write(&good, "[backend]\nmodel = \"phi3\"\n").unwrap();
    let file = load_config_file(Some(&good)).unwrap();
    assert_eq!(file.backend.model.as_deref(), Some("phi3"));
}
