use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use aura_assistant::backend::{BackendStatus, InferenceClient, resolve_model};
use aura_assistant::daemon::build_speech;
use aura_assistant::voice::{AudioCapture, AudioPlayback, PLAYBACK_SAMPLE_RATE, rms_energy};
use aura_assistant::{Config, ConversationBackend, Daemon};

/// Aura - a local voice assistant
#[derive(Parser)]
#[command(name = "aura", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "AURA_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Model to request from the backend
    #[arg(long)]
    model: Option<String>,

    /// Inference server URL
    #[arg(long)]
    backend_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the voice assistant (default)
    Run,
    /// Text conversation on the terminal
    Chat,
    /// List backend models and the one that will be used
    Models,
    /// Speak text through the speech chain
    Say {
        /// Text to speak
        text: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,aura_assistant=info",
        1 => "info,aura_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command.unwrap_or(Command::Run);

    match command {
        Command::TestMic { duration } => return test_mic(duration).await,
        Command::TestSpeaker => return test_speaker().await,
        _ => {}
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.backend.model = model;
    }
    if let Some(url) = cli.backend_url {
        config.backend.url = url;
    }
    tracing::debug!(?config, "loaded configuration");

    match command {
        Command::Chat => chat(config).await,
        Command::Models => models(&config).await,
        Command::Say { text } => {
            build_speech(config.speech)?.speak(&text).await;
            Ok(())
        }
        Command::Run | Command::TestMic { .. } | Command::TestSpeaker => {
            let phrases = config.wake.phrases.join("\", \"");
            let daemon = Daemon::new(config).await?;
            tracing::info!("aura ready - say \"{phrases}\"");
            daemon.run().await?;
            Ok(())
        }
    }
}

/// Text-only conversation with the same backend
async fn chat(config: Config) -> anyhow::Result<()> {
    let mut backend = ConversationBackend::connect(&config.backend).await?;
    println!("Aura ({}). Type 'exit' to stop.", backend.model());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        let reply = backend.think(input).await;
        println!("Aura: {reply}");
    }

    Ok(())
}

/// List models and show how the configured one resolves
async fn models(config: &Config) -> anyhow::Result<()> {
    let client = InferenceClient::new(&config.backend.url, config.backend.request_timeout)?;
    let available = client
        .list_models()
        .await
        .map_err(aura_assistant::Error::from)?;

    println!("Models on {}:", client.base_url());
    for model in &available {
        println!("  {model}");
    }

    match resolve_model(&config.backend.model, &available) {
        BackendStatus::Ready { model } => println!("\nUsing: {model}"),
        BackendStatus::Substituted { requested, model } => {
            println!("\n{requested} not found, using: {model}");
        }
        BackendStatus::Offline => println!("\nBackend offline"),
    }

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Stay quiet for a moment, then speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let noise_floor = rms_energy(&capture.peek_buffer());
    capture.clear_buffer();
    println!("Noise floor: {noise_floor:.4}");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = rms_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near the noise floor, check:");
    println!("  1. Is your mic plugged in and unmuted?");
    println!("  2. Is it the system's default input device?");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), PLAYBACK_SAMPLE_RATE);

    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check the default output device and its volume.");

    Ok(())
}
