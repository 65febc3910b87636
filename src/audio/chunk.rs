// Chunk accumulation and encoding.
//
// Frames from the capture backend accumulate here between timer ticks; each
// tick drains everything accumulated so far into one transport payload.
// Accumulations shorter than the configured minimum are treated as silence
// and discarded without being queued.

use std::io::Cursor;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::AudioFrame;

/// Transport encoding of a chunk payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFormat {
    /// Raw little-endian 16-bit PCM, base64-encoded
    Pcm16,
    /// WAV container, base64-encoded
    Wav,
}

impl std::str::FromStr for ChunkFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pcm16" => Ok(Self::Pcm16),
            "wav" => Ok(Self::Wav),
            other => anyhow::bail!("unknown chunk format: {other}"),
        }
    }
}

/// One encoded audio chunk, ready for the remote pipeline
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Position in the chunk stream, strictly increasing
    pub sequence: u64,
    /// Base64 payload in the configured format
    pub payload: String,
    pub format: ChunkFormat,
    pub duration_ms: u64,
    pub captured_at: DateTime<Utc>,
}

/// Accumulates raw frames and serializes them into chunks on demand
pub struct ChunkAccumulator {
    format: ChunkFormat,
    sample_rate: u32,
    channels: u16,
    min_samples: usize,
    pending: Vec<i16>,
    sequence: u64,
}

impl ChunkAccumulator {
    pub fn new(format: ChunkFormat, sample_rate: u32, channels: u16, min_chunk_ms: u64) -> Self {
        let min_samples =
            (sample_rate as u64 * channels as u64 * min_chunk_ms / 1000) as usize;
        Self {
            format,
            sample_rate,
            channels,
            min_samples,
            pending: Vec::new(),
            sequence: 0,
        }
    }

    /// Append a frame; frames that do not match the configured format are dropped
    pub fn push_frame(&mut self, frame: &AudioFrame) {
        if frame.sample_rate != self.sample_rate {
            warn!(
                "frame sample rate mismatch: expected {}, got {}, dropping frame",
                self.sample_rate, frame.sample_rate
            );
            return;
        }

        if frame.channels != self.channels {
            warn!(
                "frame channel count mismatch: expected {}, got {}, dropping frame",
                self.channels, frame.channels
            );
            return;
        }

        self.pending.extend_from_slice(&frame.samples);
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Drain everything accumulated since the last call into one chunk.
    ///
    /// Returns None when the accumulation is below the silence threshold;
    /// the pending samples are discarded either way so the next chunk starts
    /// at the current tick.
    pub fn take(&mut self) -> Result<Option<EncodedChunk>> {
        let samples = std::mem::take(&mut self.pending);

        if samples.len() < self.min_samples {
            if !samples.is_empty() {
                debug!(
                    "discarding {} samples below silence threshold ({})",
                    samples.len(),
                    self.min_samples
                );
            }
            return Ok(None);
        }

        let duration_ms =
            samples.len() as u64 * 1000 / (self.sample_rate as u64 * self.channels as u64);

        let payload = match self.format {
            ChunkFormat::Pcm16 => encode_pcm16(&samples),
            ChunkFormat::Wav => encode_wav(&samples, self.sample_rate, self.channels)?,
        };

        let chunk = EncodedChunk {
            sequence: self.sequence,
            payload,
            format: self.format,
            duration_ms,
            captured_at: Utc::now(),
        };
        self.sequence += 1;

        Ok(Some(chunk))
    }
}

/// Little-endian PCM bytes to base64
fn encode_pcm16(samples: &[i16]) -> String {
    let pcm_bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(pcm_bytes)
}

/// In-memory WAV container to base64
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<String> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV chunk")?;
    }

    Ok(base64::engine::general_purpose::STANDARD.encode(cursor.into_inner()))
}
