use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hound::WavReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{resample_linear, to_i16, to_mono, AudioBackend, AudioFrame, CaptureConfig};
use super::volume::Analyser;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file as if it were a live source.
///
/// With `paced` set the frames are emitted at the file's natural rate,
/// which makes it a stand-in for a microphone in tests and batch runs.
pub struct FileBackend {
    file: AudioFile,
    config: CaptureConfig,
    paced: bool,
    analyser: Arc<Analyser>,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl AsRef<std::path::Path>, config: CaptureConfig, paced: bool) -> Result<Self> {
        let file = AudioFile::open(path)?;
        Ok(Self {
            file,
            config,
            paced,
            analyser: Arc::new(Analyser::new()),
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("file capture already started");
        }

        let target_rate = self.config.target_sample_rate;
        let target_channels = self.config.target_channels;
        let frame_ms = self.config.buffer_duration_ms;

        // Normalize the whole file up front; frames are then plain slices
        let float: Vec<f32> = self
            .file
            .samples
            .iter()
            .map(|&s| s as f32 / 32768.0)
            .collect();
        let mono = to_mono(&float, self.file.channels as usize);
        let resampled = resample_linear(&mono, self.file.sample_rate, target_rate);
        let samples = to_i16(&resampled);

        let samples_per_frame = (target_rate as u64 * frame_ms / 1000) as usize;
        let paced = self.paced;
        let analyser = Arc::clone(&self.analyser);
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);

        self.task = Some(tokio::spawn(async move {
            let mut timestamp_ms = 0u64;

            for chunk in samples.chunks(samples_per_frame.max(1)) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }

                analyser.write_block(chunk);

                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate: target_rate,
                    channels: target_channels,
                    timestamp_ms,
                };
                timestamp_ms += frame_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }

                if paced {
                    tokio::time::sleep(Duration::from_millis(frame_ms)).await;
                }
            }

            capturing.store(false, Ordering::SeqCst);
        }));

        info!(path = %self.file.path, paced, "file capture started");
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.analyser.close();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn set_gain(&self, _gain: f32) {
        // File replay has no input stage worth scaling
    }

    fn analyser(&self) -> Arc<Analyser> {
        Arc::clone(&self.analyser)
    }

    fn name(&self) -> &str {
        "file"
    }
}
