use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub backend: BackendSettings,
    pub audio: AudioSettings,
    pub chunking: ChunkingSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Deserialize)]
pub struct BackendSettings {
    /// Base URL of the hosted backend (serverless functions live under it)
    pub base_url: String,
    pub api_key: String,
    /// Per-request timeout in seconds, applied to every remote call
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Software automatic gain control on captured audio
    pub auto_gain: bool,
    /// Software noise gate standing in for noise suppression
    pub noise_suppression: bool,
    /// OS-level hint only; not applied in software
    pub echo_cancellation: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChunkingSettings {
    /// Seconds of audio accumulated per chunk before it is submitted
    pub interval_secs: u64,
    /// Accumulations shorter than this are treated as silence and discarded
    pub min_chunk_ms: u64,
    /// "pcm16" or "wav"
    pub format: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionSettings {
    /// "strict" refuses to start without a microphone, "degraded" continues
    pub startup_mode: String,
    pub max_queued_chunks: usize,
    /// Initial output volume, 0-100
    pub playback_volume: u8,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
