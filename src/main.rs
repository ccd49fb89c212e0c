//! Binary entry point

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pendant_gateway::audio::{AudioCapture, PlaybackHandle, chime};
use pendant_gateway::{Config, Engine};

#[derive(Parser)]
#[command(name = "pendant", version, about = "Voice assistant gateway")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (the default)
    Run,
    /// Meter microphone input for a few seconds
    TestMic {
        /// How long to listen, in seconds
        #[arg(long, default_value_t = 5)]
        duration: u64,
    },
    /// Play the startup chime through the speaker
    TestSpeaker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "info,pendant_gateway=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::load()?;
            Engine::new(config).run().await?;
        }
        Command::TestMic { duration } => {
            let config = Config::load().unwrap_or_default();
            test_mic(&config, Duration::from_secs(duration)).await?;
        }
        Command::TestSpeaker => {
            let config = Config::load().unwrap_or_default();
            test_speaker(&config).await;
        }
    }

    Ok(())
}

/// Print a coarse level meter from live microphone input
async fn test_mic(config: &Config, duration: Duration) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new(config.audio.capture_rate, config.audio.chunk_size);
    let mut chunks = capture.start()?;
    println!("listening for {}s...", duration.as_secs());

    let deadline = tokio::time::Instant::now() + duration;
    loop {
        let chunk = tokio::select! {
            chunk = chunks.recv() => chunk,
            () = tokio::time::sleep_until(deadline) => break,
        };
        let Some(chunk) = chunk else { break };

        let sum: f64 = chunk.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
        #[allow(clippy::cast_precision_loss)]
        let rms = (sum / chunk.len().max(1) as f64).sqrt();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bars = ((rms / f64::from(i16::MAX)) * 50.0).round() as usize;
        println!("{:5.0} |{}", rms, "#".repeat(bars.min(50)));
    }

    capture.stop();
    Ok(())
}

/// Play the startup chime and wait for it to drain
async fn test_speaker(config: &Config) {
    let playback = PlaybackHandle::spawn(config.audio.playback_rate);
    playback.open();
    playback.enqueue(&chime::startup_chime(config.audio.playback_rate));
    println!("playing chime...");

    if !playback.drain(Duration::from_secs(5)).await {
        println!("speaker did not drain (no output device?)");
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    playback.shutdown();
}
