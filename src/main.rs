use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_voice::audio::AudioFormat;
use cadence_voice::convert::FfmpegConverter;
use cadence_voice::{Config, FormatConverter};

/// Cadence - Real-time multi-party voice conversation core
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Check the environment: configuration, API keys, ffmpeg
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_voice=info",
        1 => "info,cadence_voice=debug",
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Command::Check) | None => check().await,
    }
}

/// Verify that the environment can support full conversation round trips
async fn check() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    println!("Configuration");
    println!(
        "  VAD: threshold {:.3}, silence {} ms, max utterance {} ms, pre-roll {} ms",
        config.vad.energy_threshold,
        config.vad.silence_ms,
        config.vad.max_utterance_ms,
        config.vad.pre_roll_ms
    );
    println!(
        "  Models: stt {}, chat {}, tts {} (voice {})",
        config.pipeline.stt_model,
        config.pipeline.chat_model,
        config.pipeline.tts_model,
        config.pipeline.tts_voice
    );
    println!(
        "  Reconnect: {} attempts, {} ms backoff unit",
        config.reconnect.max_attempts,
        config.reconnect.backoff_unit.as_millis()
    );

    println!("\nAPI keys");
    print_key("OPENAI_API_KEY", config.api_keys.openai.is_some());
    print_key("DEEPGRAM_API_KEY", config.api_keys.deepgram.is_some());
    print_key("ELEVENLABS_API_KEY", config.api_keys.elevenlabs.is_some());
    if !config.api_keys.pipeline_ready() {
        println!("  -> no OpenAI key: calls will segment audio but not converse");
    }

    println!("\nFormat conversion");
    match FfmpegConverter::new(config.pipeline.conversion_timeout) {
        Ok(converter) => {
            // 100 ms of silence through the real pipeline path
            let silence = vec![0u8; 19_200];
            match converter
                .convert(&silence, AudioFormat::Pcm48kStereo, AudioFormat::Wav16kMono)
                .await
            {
                Ok(wav) => println!("  ffmpeg: ok ({} byte test conversion)", wav.len()),
                Err(e) => println!("  ffmpeg: found but conversion failed: {e}"),
            }
        }
        Err(e) => println!("  ffmpeg: not available ({e}), native converter will be used"),
    }

    Ok(())
}

fn print_key(name: &str, present: bool) {
    let mark = if present { "set" } else { "missing" };
    println!("  {name}: {mark}");
}
