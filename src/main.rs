use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fridge_companion::agent::ChatMessage;
use fridge_companion::daemon::{build_backend, build_synthesizer};
use fridge_companion::presentation::PadPolicy;
use fridge_companion::turn::{TurnEvent, event_channel, parse_response};
use fridge_companion::voice::{
    AudioClip, AudioInput, AudioOutput, MicInput, SpeakerOutput, SpeechQueue, mean_abs_amplitude,
    rms_energy,
};
use fridge_companion::{Config, Daemon};

/// Fridge - a talking fridge companion
#[derive(Parser)]
#[command(name = "fridge", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the companion (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the configured TTS backend
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! I'm your fridge.")]
        text: String,
    },
    /// Send one message to the model and print the interpreted reply
    Ask {
        /// Message to send
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,fridge_companion=info",
        1 => "info,fridge_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let config = Config::load()?;
            tracing::debug!(?config, "loaded configuration");
            Daemon::new(config).run().await?;
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::Say { text } => say(&text).await,
        Command::Ask { text } => ask(&text).await,
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load()?;
    let mut input = MicInput::new(config.capture.sample_rate)?;
    input.open()?;

    println!("Sample rate: {} Hz", input.sample_rate());
    println!("VAD threshold: {:.4}", config.capture.vad.threshold);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = input.drain();
        let energy = rms_energy(&samples);
        let level = mean_abs_amplitude(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let speech = if level >= config.capture.vad.threshold {
            "speech"
        } else {
            "silence"
        };

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {energy:.4} | Mean: {level:.4} | Peak: {peak:.4} | {speech:7} | [{meter}]",
            i + 1,
        );
    }

    input.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let output = SpeakerOutput::new()?;
    println!("Device: {}", output.device_name());

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    output
        .play(AudioClip {
            samples,
            channels: 1,
            sample_rate,
        })
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: aplay -l (to list devices)");

    Ok(())
}

/// Speak text through the configured synthesizer
async fn say(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let (events, mut rx) = event_channel();

    let queue = SpeechQueue::new(
        build_synthesizer(&config)?,
        std::sync::Arc::new(SpeakerOutput::new()?),
        config.tts.voice.clone(),
        events,
    );

    queue.enqueue(text);
    if !queue.is_speaking() {
        println!("Nothing to say.");
        return Ok(());
    }

    while let Some(event) = rx.recv().await {
        if matches!(event, TurnEvent::PlaybackQueueDrained) {
            break;
        }
    }

    println!("Done.");
    Ok(())
}

/// Send one message and print the interpreted reply
async fn ask(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let backend = build_backend(&config)?;

    let history = [
        ChatMessage::system(config.system_prompt()),
        ChatMessage::user(text),
    ];
    let raw = backend.generate(&history, &[]).await?;
    let response = parse_response(&raw);

    println!("Raw:     {raw}");
    println!("Message: {}", response.message);
    match response.emotion {
        Some(emotion) => {
            let feedback = PadPolicy::default().feedback(emotion);
            println!(
                "Emotion: P={:.2} A={:.2} D={:.2} -> {} ({:?})",
                emotion.pleasure, emotion.arousal, emotion.dominance, feedback.expression, feedback.burst
            );
        }
        None => println!("Emotion: none"),
    }

    Ok(())
}
