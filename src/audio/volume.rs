// Input level metering.
//
// The capture callback writes byte-scale level bins into a shared Analyser on
// every audio block; a monitor task samples those bins on an animation-frame
// cadence (~60 Hz), independent of the chunking interval, and pushes a
// normalized 0-100 loudness value to a single subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Loudness above this value counts as speech
pub const SPEAKING_THRESHOLD: f32 = 15.0;

/// Sampling cadence of the monitor task
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(16);

const BIN_COUNT: usize = 32;

/// Shared level data written by a capture callback and read by the monitor.
///
/// Bins hold byte-scale (0-255) mean amplitudes of sub-blocks of the most
/// recent audio block. `close()` is terminal: a closed analyser never
/// reopens, and the monitor stops sampling once it observes the flag.
pub struct Analyser {
    bins: Mutex<[u8; BIN_COUNT]>,
    closed: AtomicBool,
}

impl Analyser {
    pub fn new() -> Self {
        Self {
            bins: Mutex::new([0u8; BIN_COUNT]),
            closed: AtomicBool::new(false),
        }
    }

    /// Update the bins from a block of PCM samples
    pub fn write_block(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let mut bins = [0u8; BIN_COUNT];
        let step = (samples.len() / BIN_COUNT).max(1);

        for (i, bin) in bins.iter_mut().enumerate() {
            let start = i * step;
            if start >= samples.len() {
                break;
            }
            let end = (start + step).min(samples.len());
            let sum: u64 = samples[start..end]
                .iter()
                .map(|&s| (s as i32).unsigned_abs() as u64)
                .sum();
            let mean = sum / (end - start) as u64;
            // i16 amplitude down to byte scale
            *bin = (mean / 128).min(255) as u8;
        }

        *self.bins.lock().expect("analyser bins lock poisoned") = bins;
    }

    pub fn byte_levels(&self) -> [u8; BIN_COUNT] {
        *self.bins.lock().expect("analyser bins lock poisoned")
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

/// A single loudness reading, replaced continuously
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeSample {
    /// Normalized loudness, 0-100
    pub level: f32,
    /// Whether the level crosses the speaking threshold
    pub is_speaking: bool,
}

impl VolumeSample {
    pub fn from_byte_levels(bins: &[u8]) -> Self {
        let mean = if bins.is_empty() {
            0.0
        } else {
            bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
        };
        let level = (mean / 128.0 * 100.0).clamp(0.0, 100.0);
        Self {
            level,
            is_speaking: level > SPEAKING_THRESHOLD,
        }
    }

    pub fn silent() -> Self {
        Self {
            level: 0.0,
            is_speaking: false,
        }
    }
}

impl Default for VolumeSample {
    fn default() -> Self {
        Self::silent()
    }
}

type VolumeCallback = Box<dyn Fn(VolumeSample) + Send + 'static>;

/// Samples an [`Analyser`] on its own task and feeds a single subscriber.
///
/// The subscriber is replace-on-set: registering a callback after sampling
/// has started takes effect from the next frame. Sampling ends permanently
/// once the analyser is closed.
pub struct VolumeMonitor {
    analyser: Arc<Analyser>,
    subscriber: Arc<Mutex<Option<VolumeCallback>>>,
    current_tx: watch::Sender<VolumeSample>,
    current_rx: watch::Receiver<VolumeSample>,
    task: Option<JoinHandle<()>>,
}

impl VolumeMonitor {
    pub fn new(analyser: Arc<Analyser>) -> Self {
        let (current_tx, current_rx) = watch::channel(VolumeSample::silent());
        Self {
            analyser,
            subscriber: Arc::new(Mutex::new(None)),
            current_tx,
            current_rx,
            task: None,
        }
    }

    /// Register (or replace) the subscriber; takes effect on the next frame
    pub fn subscribe(&self, callback: impl Fn(VolumeSample) + Send + 'static) {
        *self.subscriber.lock().expect("subscriber lock poisoned") = Some(Box::new(callback));
    }

    pub fn clear_subscriber(&self) {
        *self.subscriber.lock().expect("subscriber lock poisoned") = None;
    }

    /// Pull-style access to the most recent sample
    pub fn watch(&self) -> watch::Receiver<VolumeSample> {
        self.current_rx.clone()
    }

    /// Start the sampling task; no-op if already running
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let analyser = Arc::clone(&self.analyser);
        let subscriber = Arc::clone(&self.subscriber);
        let current = self.current_tx.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;

                if analyser.is_closed() {
                    debug!("analyser closed, volume sampling stopped");
                    break;
                }

                let sample = VolumeSample::from_byte_levels(&analyser.byte_levels());
                let _ = current.send(sample);

                if let Some(callback) = &*subscriber.lock().expect("subscriber lock poisoned") {
                    callback(sample);
                }
            }
        }));
    }

    /// Stop sampling and drop the subscriber registration; idempotent
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.clear_subscriber();
    }
}

impl Drop for VolumeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
