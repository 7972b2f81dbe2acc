use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ada_voice::config::{SpeechProvider, TranscriptionProvider};
use ada_voice::console::{self, ConsoleOptions};
use ada_voice::voice::{
    AudioCapture, AudioPlayback, AudioSink, DecodedAudio, MicTranscriber, SpeechSynthesizer,
    SpeechToText, TextToSpeech, TranscriptSource, rms,
};
use ada_voice::{ChatCompletions, Config, SharedTiming, TurnController, events};

/// Ada - wake-word driven voice chat assistant
#[derive(Parser)]
#[command(name = "ada", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/ada/config.toml)
    #[arg(short, long, env = "ADA_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Start listening immediately
    #[arg(long)]
    autostart: bool,

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
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Record once and print the transcript
    TestListen {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,ada_voice=info",
        1 => "info,ada_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
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
    let config_path = cli.config.as_deref();

    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => {
                test_tts(&Config::load(config_path)?, &text).await
            }
            Command::TestListen { duration } => {
                test_listen(&Config::load(config_path)?, duration).await
            }
        };
    }

    let config = Config::load(config_path)?;
    tracing::debug!(?config, "loaded configuration");
    tracing::info!(
        wake_words = ?config.assistant.wake_words,
        chat_model = %config.chat.model,
        tts = %config.speech.provider,
        stt = %config.transcription.provider,
        "starting ada"
    );

    let openai_key = config
        .api_keys
        .openai
        .clone()
        .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for chat"))?;

    let (event_tx, event_rx) = events::channel();
    let controller = TurnController::builder()
        .source(Box::new(build_transcriber(&config)?))
        .chat(Box::new(ChatCompletions::new(openai_key, config.chat_settings())?))
        .synthesizer(build_synthesizer(&config)?)
        .sink(Arc::new(AudioPlayback::new()?))
        .events(event_tx)
        .assistant(config.assistant.clone())
        .max_history_pairs(config.chat.max_history_pairs)
        .timing(Arc::new(SharedTiming::new(config.timing)))
        .build()?;

    console::run(
        Arc::new(controller),
        event_rx,
        ConsoleOptions {
            json: cli.json,
            autostart: cli.autostart,
        },
    )
    .await?;

    Ok(())
}

/// Microphone transcriber for the configured STT provider
fn build_transcriber(config: &Config) -> anyhow::Result<MicTranscriber> {
    let stt_config = &config.transcription;
    let stt = match stt_config.provider {
        TranscriptionProvider::Whisper => {
            let key = config
                .api_keys
                .openai
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for Whisper"))?;
            SpeechToText::new_whisper(key, stt_config.model.clone(), stt_config.language.clone())?
        }
        TranscriptionProvider::Deepgram => {
            let key = config
                .api_keys
                .deepgram
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DEEPGRAM_API_KEY is required for Deepgram"))?;
            SpeechToText::new_deepgram(key, stt_config.model.clone(), stt_config.language.clone())?
        }
    };
    Ok(MicTranscriber::new(stt, stt_config.energy_threshold))
}

/// Speech synthesizer for the configured TTS provider
fn build_synthesizer(config: &Config) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
    let speech = &config.speech;
    let tts = match speech.provider {
        SpeechProvider::ElevenLabs => {
            let key = config
                .api_keys
                .elevenlabs
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ELEVENLABS_API_KEY is required for ElevenLabs"))?;
            TextToSpeech::new_elevenlabs(
                key,
                speech.voice_id.clone(),
                speech.model.clone(),
                speech.voice_settings,
            )?
        }
        SpeechProvider::OpenAI => {
            let key = config
                .api_keys
                .openai
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for OpenAI TTS"))?;
            TextToSpeech::new_openai(key, speech.voice_id.clone(), speech.model.clone(), speech.speed)?
        }
    };
    Ok(Arc::new(tts))
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new();
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
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

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new()?;

    // 2 seconds of 440Hz at 24kHz
    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    let audio = DecodedAudio {
        samples,
        sample_rate,
    };
    tokio::task::spawn_blocking(move || playback.play_samples(&audio)).await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output with the configured provider
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(config)?;

    println!("Synthesizing speech ({})...", config.speech.provider);
    let mp3_data = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    println!("Playing audio...");
    let playback = AudioPlayback::new()?;
    tokio::task::spawn_blocking(move || playback.play_mp3(&mp3_data)).await??;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Record once with the configured STT provider and print the transcript
async fn test_listen(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Recording for {duration} seconds... Say anything!");

    let mut transcriber = build_transcriber(config)?;
    transcriber.configure(config.timing.stt());
    transcriber.start().await?;
    let heard = transcriber.record_for(Duration::from_secs(duration)).await;
    transcriber.stop().await?;

    match heard?.as_str() {
        "" => println!("No speech detected in test"),
        text => println!("Heard: '{text}'"),
    }

    Ok(())
}
