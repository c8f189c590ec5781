use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kaiwa::synth::{CommandSynthesizer, RemoteSynthesizer, SpeechSynthesizer};
use kaiwa::voice::{AudioCapture, AudioClip, AudioSink, CpalSink, SAMPLE_RATE};
use kaiwa::{Config, Daemon};

/// Kaiwa - voice conversation practice with an AI partner
#[derive(Parser)]
#[command(name = "kaiwa", version, about)]
struct Cli {
    /// Conversation topic (e.g. "ordering food")
    #[arg(short, long, env = "KAIWA_TOPIC")]
    topic: Option<String>,

    /// Practice language (e.g. "Japanese")
    #[arg(short, long, env = "KAIWA_LANGUAGE")]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test remote speech synthesis
    TestTts {
        /// Text to speak
        #[arg(default_value = "こんにちは！これは音声合成のテストです。")]
        text: String,
    },
    /// Test the local fallback synthesizer
    TestFallback {
        /// Text to speak
        #[arg(default_value = "This is the fallback voice.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,kaiwa=info",
        1 => "info,kaiwa=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::TestFallback { text } => test_fallback(&text).await,
        };
    }

    let mut config = Config::load();
    if let Some(topic) = cli.topic {
        config.conversation.topic = Some(topic);
    }
    if let Some(language) = cli.language {
        config.conversation.language = language;
    }
    tracing::debug!(
        base_url = %config.chat.base_url,
        model = %config.chat.model,
        streaming = config.chat.streaming,
        "configuration resolved"
    );

    let daemon = Daemon::new(config)?;
    daemon.run().await?;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {SAMPLE_RATE} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new()?;

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let clip = AudioClip {
        samples,
        sample_rate,
    };
    println!(
        "Playing {} samples at {sample_rate} Hz...",
        clip.samples.len()
    );
    sink.play(&clip).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test remote speech synthesis
async fn test_tts(text: &str) -> anyhow::Result<()> {
    println!("Testing speech synthesis with: \"{text}\"\n");

    let config = Config::load();
    let api_key = config.require_api_key()?;
    let synth = RemoteSynthesizer::new(
        &config.chat.base_url,
        api_key,
        &config.voice.tts_model,
        &config.voice.tts_voice,
    )?
    .with_speed(config.voice.tts_speed);

    println!("Synthesizing...");
    let clip = synth.synthesize(text).await?;
    println!(
        "Got {:.1}s of audio at {} Hz",
        clip.duration().as_secs_f32(),
        clip.sample_rate
    );

    println!("Playing...");
    let sink = CpalSink::new()?;
    sink.play(&clip).await?;

    println!("\n---");
    println!("If you heard the speech, synthesis is working!");

    Ok(())
}

/// Test the local fallback synthesizer
async fn test_fallback(text: &str) -> anyhow::Result<()> {
    println!("Testing fallback synthesis with: \"{text}\"\n");

    let config = Config::load();
    let synth = CommandSynthesizer::discover()?.with_language(&config.conversation.language_code);

    println!("Synthesizing...");
    let clip = synth.synthesize(text).await?;
    println!(
        "Got {:.1}s of audio at {} Hz",
        clip.duration().as_secs_f32(),
        clip.sample_rate
    );

    println!("Playing...");
    let sink = CpalSink::new()?;
    sink.play(&clip).await?;

    println!("\n---");
    println!("If you heard the robotic voice, the fallback is working!");

    Ok(())
}
