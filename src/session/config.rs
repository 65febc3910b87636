use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, ChunkFormat};

/// Behavior when the microphone cannot be acquired at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupMode {
    /// Refuse to start the session without audio input
    Strict,
    /// Continue without audio input; the session runs but produces no chunks
    Degraded,
}

impl std::str::FromStr for StartupMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "degraded" => Ok(Self::Degraded),
            other => anyhow::bail!("unknown startup mode: {other}"),
        }
    }
}

/// Configuration for a translation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Meeting this session belongs to; transcripts are persisted against it
    pub meeting_id: Option<String>,

    /// Account whose minute balance is decremented per processed chunk
    pub user_id: String,

    /// Language spoken into the microphone (e.g. "en")
    pub source_language: String,

    /// Language of the synthesized output (e.g. "es")
    pub target_language: String,

    /// How much audio accumulates before each chunk is submitted
    pub chunk_interval: Duration,

    /// Accumulations shorter than this are discarded as silence
    pub min_chunk_ms: u64,

    pub chunk_format: ChunkFormat,

    pub sample_rate: u32,
    pub channels: u16,

    /// Software automatic gain control on captured audio
    pub auto_gain: bool,

    /// Software noise gate standing in for noise suppression
    pub noise_suppression: bool,

    /// OS-level hint only; not applied in software
    pub echo_cancellation: bool,

    pub startup_mode: StartupMode,

    /// Queue bound; the oldest queued chunk is dropped past this
    pub max_queued_chunks: usize,

    /// Upper bound on waiting for queued chunks during stop
    pub stop_drain_timeout: Duration,

    /// Initial output volume, 0-100
    pub initial_volume: u8,
}

impl SessionConfig {
    /// Capture settings derived from this session's audio configuration
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_sample_rate: self.sample_rate,
            target_channels: self.channels,
            auto_gain: self.auto_gain,
            noise_suppression: self.noise_suppression,
            echo_cancellation: self.echo_cancellation,
            ..CaptureConfig::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            meeting_id: Some(format!("meeting-{}", uuid::Uuid::new_v4())),
            user_id: "local".to_string(),
            source_language: "en".to_string(),
            target_language: "es".to_string(),
            chunk_interval: Duration::from_secs(2),
            min_chunk_ms: 250,
            chunk_format: ChunkFormat::Pcm16,
            sample_rate: 16000, // what the transcription service expects
            channels: 1,        // Mono
            auto_gain: true,
            noise_suppression: true,
            echo_cancellation: true,
            startup_mode: StartupMode::Degraded,
            max_queued_chunks: 8,
            stop_drain_timeout: Duration::from_secs(30),
            initial_volume: 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_carries_constraint_flags() {
        let config = SessionConfig {
            auto_gain: false,
            noise_suppression: false,
            ..SessionConfig::default()
        };

        let capture = config.capture_config();
        assert!(!capture.auto_gain);
        assert!(!capture.noise_suppression);
        assert!(capture.echo_cancellation);
        assert_eq!(capture.target_sample_rate, 16000);
        assert_eq!(capture.target_channels, 1);
    }
}
