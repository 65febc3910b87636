use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use babelmeet::audio::{AudioSink, AudioSource, NullSink, PlaybackController, RodioSink};
use babelmeet::pipeline::HttpBackend;
use babelmeet::session::{SessionConfig, SessionEvent, StartupMode, TranslationSession};
use babelmeet::Config;

#[derive(Parser, Debug)]
#[command(name = "babelmeet", about = "Live meeting translation from the command line")]
struct Args {
    /// Path to the config file (without extension)
    #[arg(long, default_value = "config/babelmeet")]
    config: String,

    /// Meeting identifier; transcripts are persisted against it
    #[arg(long)]
    meeting: Option<String>,

    /// Account whose minute balance is charged
    #[arg(long, default_value = "local")]
    user: String,

    /// Language spoken into the microphone
    #[arg(long, default_value = "en")]
    source: String,

    /// Language of the translated output
    #[arg(long, default_value = "es")]
    target: String,

    /// Translate a WAV file instead of the microphone
    #[arg(long)]
    file: Option<String>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Babelmeet v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", cfg.backend.base_url);
    info!("Translating {} -> {}", args.source, args.target);

    let backend = Arc::new(HttpBackend::new(
        &cfg.backend.base_url,
        &cfg.backend.api_key,
        Duration::from_secs(cfg.backend.request_timeout_secs),
    )?);

    let sink: Arc<dyn AudioSink> = match RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("no audio output device, translations will not be audible: {e:#}");
            Arc::new(NullSink)
        }
    };
    let playback = Arc::new(PlaybackController::new(sink, cfg.session.playback_volume));

    let session_config = SessionConfig {
        meeting_id: args.meeting,
        user_id: args.user,
        source_language: args.source,
        target_language: args.target,
        chunk_interval: Duration::from_secs(cfg.chunking.interval_secs),
        min_chunk_ms: cfg.chunking.min_chunk_ms,
        chunk_format: cfg.chunking.format.parse()?,
        sample_rate: cfg.audio.sample_rate,
        channels: cfg.audio.channels,
        auto_gain: cfg.audio.auto_gain,
        noise_suppression: cfg.audio.noise_suppression,
        echo_cancellation: cfg.audio.echo_cancellation,
        startup_mode: cfg
            .session
            .startup_mode
            .parse::<StartupMode>()
            .context("invalid startup_mode in config")?,
        max_queued_chunks: cfg.session.max_queued_chunks,
        initial_volume: cfg.session.playback_volume,
        ..SessionConfig::default()
    };

    let source = match args.file {
        Some(path) => AudioSource::File { path, paced: true },
        None => AudioSource::Microphone,
    };

    let mut session = TranslationSession::new(session_config, backend, playback);
    let mut events = session.events().context("session events already taken")?;

    session.on_transcript(|entry| {
        println!("[{}] {}", entry.timestamp.format("%H:%M:%S"), entry.original);
        println!("         -> {}", entry.translated);
    });

    session.initialize(source).await?;
    session.start_translation().await?;

    let deadline = args.duration.map(Duration::from_secs);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
        }
        _ = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        } => {
            info!("duration elapsed");
        }
        _ = async {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::QuotaExhausted => {
                        warn!("translation minutes exhausted");
                        break;
                    }
                    SessionEvent::MicrophoneUnavailable => {
                        warn!("running without a microphone");
                    }
                    _ => {}
                }
            }
        } => {}
    }

    session.stop_translation().await?;

    let stats = session.stats();
    info!(
        "session finished: {} chunks processed, {} dropped, {} transcript entries",
        stats.chunks_processed, stats.chunks_dropped, stats.transcript_entries
    );

    Ok(())
}
