// Microphone capture via cpal.
//
// cpal streams are not Send, so the stream lives on a dedicated thread that
// owns it for the lifetime of the capture. The audio callback converts the
// device format to mono i16 at the target rate, applies the noise gate,
// automatic gain control and the user input gain, feeds the shared analyser,
// and ships frames over a bounded channel.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{resample_linear, to_i16, to_mono, AudioBackend, AudioFrame, CaptureConfig};
use super::volume::Analyser;

/// Frames buffered between the audio callback and the consumer
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Blocks with RMS below this are zeroed by the noise gate
const NOISE_GATE_RMS: f32 = 0.002;

// AGC constants, tuned for speech
const AGC_TARGET_DBFS: f32 = -20.0;
const AGC_NOISE_FLOOR_DBFS: f32 = -50.0;
const AGC_MAX_GAIN: f32 = 10.0;
const AGC_MIN_GAIN: f32 = 0.1;
const AGC_SMOOTHING: f32 = 0.1;

/// Automatic gain control state, applied block by block
struct AgcState {
    current_gain: f32,
}

impl Default for AgcState {
    fn default() -> Self {
        Self { current_gain: 1.0 }
    }
}

impl AgcState {
    fn process(&mut self, samples: &mut [f32]) {
        if samples.is_empty() {
            return;
        }

        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_sq / samples.len() as f32).sqrt();
        let rms_dbfs = if rms > 0.0 { 20.0 * rms.log10() } else { -100.0 };

        if rms_dbfs > AGC_NOISE_FLOOR_DBFS {
            let target = 10.0_f32.powf((AGC_TARGET_DBFS - rms_dbfs) / 20.0);
            let target = target.clamp(AGC_MIN_GAIN, AGC_MAX_GAIN);
            self.current_gain = self.current_gain * (1.0 - AGC_SMOOTHING) + target * AGC_SMOOTHING;
        } else {
            // drift back to unity under the noise floor
            self.current_gain =
                self.current_gain * (1.0 - AGC_SMOOTHING * 0.5) + AGC_SMOOTHING * 0.5;
        }

        for sample in samples.iter_mut() {
            *sample = (*sample * self.current_gain).clamp(-1.0, 1.0);
        }
    }
}

/// Microphone capture backend
pub struct MicrophoneBackend {
    config: CaptureConfig,
    analyser: Arc<Analyser>,
    /// f32 bits of the user input gain (0.0 - 1.0)
    gain_bits: Arc<AtomicU32>,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            analyser: Arc::new(Analyser::new()),
            gain_bits: Arc::new(AtomicU32::new(1.0_f32.to_bits())),
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            anyhow::bail!("microphone capture already started");
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let config = self.config.clone();
        let analyser = Arc::clone(&self.analyser);
        let gain_bits = Arc::clone(&self.gain_bits);
        let capturing = Arc::clone(&self.capturing);

        let thread = std::thread::spawn(move || {
            capture_thread(config, analyser, gain_bits, capturing, frame_tx, ready_tx, stop_rx)
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                info!("microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e).context("failed to open microphone")
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow!("capture thread exited before reporting readiness"))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        // Ordered teardown; every step guarded so repeated stops never fail
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }

        self.capturing.store(false, Ordering::SeqCst);
        self.analyser.close();
        info!("microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    fn analyser(&self) -> Arc<Analyser> {
        Arc::clone(&self.analyser)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// Body of the dedicated capture thread; returns once stop is signalled
#[allow(clippy::too_many_arguments)]
fn capture_thread(
    config: CaptureConfig,
    analyser: Arc<Analyser>,
    gain_bits: Arc<AtomicU32>,
    capturing: Arc<AtomicBool>,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(&config, analyser, gain_bits, frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(anyhow!("failed to start input stream: {e}")));
        return;
    }

    capturing.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Ok(()));

    // Park until stop; the stream lives as long as this thread does
    let _ = stop_rx.recv();
    drop(stream);
    capturing.store(false, Ordering::SeqCst);
}

fn build_input_stream(
    config: &CaptureConfig,
    analyser: Arc<Analyser>,
    gain_bits: Arc<AtomicU32>,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no audio input device available"))?;

    let device_config = device
        .default_input_config()
        .context("failed to get default input config")?;

    info!(
        device = %device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate = device_config.sample_rate().0,
        channels = device_config.channels(),
        "opening input device"
    );

    let device_rate = device_config.sample_rate().0;
    let device_channels = device_config.channels() as usize;
    let target_rate = config.target_sample_rate;
    let target_channels = config.target_channels;

    let processor = Arc::new(Mutex::new(BlockProcessor {
        agc: AgcState::default(),
        auto_gain: config.auto_gain,
        noise_gate: config.noise_suppression,
        samples_sent: 0,
    }));

    let make_callback = {
        let processor = Arc::clone(&processor);
        move |float_block: Vec<f32>| {
            let mono = to_mono(&float_block, device_channels);
            let resampled = resample_linear(&mono, device_rate, target_rate);

            let mut block = resampled;
            let timestamp_ms;
            {
                let mut proc = processor.lock().expect("block processor lock poisoned");
                if proc.noise_gate && block_rms(&block) < NOISE_GATE_RMS {
                    block.iter_mut().for_each(|s| *s = 0.0);
                }
                if proc.auto_gain {
                    proc.agc.process(&mut block);
                }
                timestamp_ms = proc.samples_sent * 1000 / target_rate as u64;
                proc.samples_sent += block.len() as u64;
            }

            let gain = f32::from_bits(gain_bits.load(Ordering::SeqCst));
            if (gain - 1.0).abs() > f32::EPSILON {
                block.iter_mut().for_each(|s| *s *= gain);
            }

            let samples = to_i16(&block);
            analyser.write_block(&samples);

            let frame = AudioFrame {
                samples,
                sample_rate: target_rate,
                channels: target_channels,
                timestamp_ms,
            };

            // Drop frames rather than block the audio callback
            if frame_tx.try_send(frame).is_err() {
                warn!("audio frame channel full, dropping frame");
            }
        }
    };

    let stream = match device_config.sample_format() {
        SampleFormat::F32 => {
            let callback = make_callback;
            device.build_input_stream(
                &device_config.into(),
                move |data: &[f32], _| callback(data.to_vec()),
                |err| error!("audio stream error: {}", err),
                None,
            )?
        }
        SampleFormat::I16 => {
            let callback = make_callback;
            device.build_input_stream(
                &device_config.into(),
                move |data: &[i16], _| {
                    let float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    callback(float)
                },
                |err| error!("audio stream error: {}", err),
                None,
            )?
        }
        SampleFormat::U16 => {
            let callback = make_callback;
            device.build_input_stream(
                &device_config.into(),
                move |data: &[u16], _| {
                    let float: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    callback(float)
                },
                |err| error!("audio stream error: {}", err),
                None,
            )?
        }
        format => anyhow::bail!("unsupported sample format: {format:?}"),
    };

    Ok(stream)
}

struct BlockProcessor {
    agc: AgcState,
    auto_gain: bool,
    noise_gate: bool,
    samples_sent: u64,
}

fn block_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
