// Playback of synthesized speech.
//
// The pipeline hands back base64 audio (mp3 or wav); playback decodes it and
// plays it fire-and-forget at the current output volume. Output volume is a
// separate control from the capture input gain even though the session's
// volume setter drives both.

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use tracing::{debug, error, warn};

/// Output device abstraction; lets the session run headless
pub trait AudioSink: Send + Sync {
    /// Play the decoded payload at the given volume (0.0 - 1.0) without
    /// waiting for completion
    fn play(&self, audio: Vec<u8>, volume: f32) -> Result<()>;
}

/// Discards audio; used in degraded mode and in tests
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, audio: Vec<u8>, _volume: f32) -> Result<()> {
        debug!("null sink dropping {} bytes of audio", audio.len());
        Ok(())
    }
}

struct PlayCommand {
    bytes: Vec<u8>,
    volume: f32,
}

/// Plays audio through the default output device via rodio.
///
/// rodio's output stream is not Send, so a dedicated thread owns it and
/// receives play commands over a channel. Dropping the sink closes the
/// channel and lets the thread exit.
pub struct RodioSink {
    command_tx: std::sync::mpsc::Sender<PlayCommand>,
    _thread: std::thread::JoinHandle<()>,
}

impl RodioSink {
    pub fn new() -> Result<Self> {
        let (command_tx, command_rx) = std::sync::mpsc::channel::<PlayCommand>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::spawn(move || {
            let (stream, handle) = match rodio::OutputStream::try_default() {
                Ok(pair) => {
                    let _ = ready_tx.send(Ok(()));
                    pair
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow!("failed to open output device: {e}")));
                    return;
                }
            };
            // keep the stream alive for the lifetime of the thread
            let _stream = stream;

            while let Ok(command) = command_rx.recv() {
                let cursor = Cursor::new(command.bytes);
                let decoder = match rodio::Decoder::new(cursor) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        error!("failed to decode synthesized audio: {}", e);
                        continue;
                    }
                };

                match rodio::Sink::try_new(&handle) {
                    Ok(sink) => {
                        sink.set_volume(command.volume);
                        sink.append(decoder);
                        sink.detach();
                    }
                    Err(e) => error!("failed to open playback sink: {}", e),
                }
            }
        });

        ready_rx
            .recv()
            .map_err(|_| anyhow!("playback thread exited during startup"))??;

        Ok(Self {
            command_tx,
            _thread: thread,
        })
    }
}

impl AudioSink for RodioSink {
    fn play(&self, audio: Vec<u8>, volume: f32) -> Result<()> {
        self.command_tx
            .send(PlayCommand {
                bytes: audio,
                volume,
            })
            .map_err(|_| anyhow!("playback thread is gone"))
    }
}

/// Decodes base64 payloads and forwards them to the sink at the configured
/// output volume (0-100 mapped to 0.0-1.0)
pub struct PlaybackController {
    sink: Arc<dyn AudioSink>,
    volume: AtomicU32,
}

impl PlaybackController {
    pub fn new(sink: Arc<dyn AudioSink>, initial_volume: u8) -> Self {
        Self {
            sink,
            volume: AtomicU32::new(initial_volume.min(100) as u32),
        }
    }

    /// Decode and play a base64 audio payload; empty payloads are ignored
    pub fn play(&self, base64_audio: &str) -> Result<()> {
        if base64_audio.is_empty() {
            debug!("empty audio payload, nothing to play");
            return Ok(());
        }

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(base64_audio)
            .context("invalid base64 audio payload")?;

        if bytes.is_empty() {
            return Ok(());
        }

        let volume = self.volume.load(Ordering::SeqCst) as f32 / 100.0;
        if let Err(e) = self.sink.play(bytes, volume) {
            warn!("playback failed: {}", e);
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(100) as u32, Ordering::SeqCst);
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst) as u8
    }
}
