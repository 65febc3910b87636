// Session orchestration.
//
// The session owns the lifecycle state machine, the chunk timer, the bounded
// chunk queue and the single pipeline worker. Chunk processing is serialized
// by construction: one worker pops the queue in FIFO order, so transcript
// entries always land in chunk order. Volume sampling runs on its own task
// and is never blocked by processing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audio::{
    AudioBackend, AudioBackendFactory, AudioSource, ChunkAccumulator, EncodedChunk,
    PlaybackController, VolumeMonitor, VolumeSample,
};
use crate::pipeline::processor::truncate;
use crate::pipeline::{ChunkOutcome, PipelineError, TranslationBackend, TranslationPipeline};

use super::config::{SessionConfig, StartupMode};
use super::stats::{SessionStats, TranscriptEntry};

/// Lifecycle state; transitions are one-directional per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

/// Session-boundary notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Started,
    Stopped,
    /// Microphone could not be acquired; session continues in degraded mode
    MicrophoneUnavailable,
    /// The account ran out of minutes; no further chunks are processed
    QuotaExhausted,
}

type TranscriptCallback = Box<dyn Fn(&TranscriptEntry) + Send + 'static>;

/// A single translation run for one meeting, from start to stop
pub struct TranslationSession {
    config: SessionConfig,
    state: SessionState,

    backend: Arc<dyn TranslationBackend>,
    pipeline: Arc<TranslationPipeline>,
    playback: Arc<PlaybackController>,

    capture: Option<Box<dyn AudioBackend>>,
    monitor: Option<VolumeMonitor>,

    accumulator: Arc<Mutex<ChunkAccumulator>>,
    queue: Arc<Mutex<VecDeque<EncodedChunk>>>,
    queue_notify: Arc<Notify>,

    /// While set, the timer admits chunks and the worker keeps waiting
    running: Arc<AtomicBool>,
    /// Timer-side admission flag; cleared on stop and on quota exhaustion
    admitting: Arc<AtomicBool>,
    quota_exhausted: Arc<AtomicBool>,

    transcript: Arc<Mutex<Vec<TranscriptEntry>>>,
    transcript_callback: Arc<Mutex<Option<TranscriptCallback>>>,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,

    pump_task: Option<JoinHandle<()>>,
    timer_task: Option<JoinHandle<()>>,
    worker_task: Option<JoinHandle<()>>,

    started_at: Option<DateTime<Utc>>,
    chunks_submitted: Arc<AtomicUsize>,
    chunks_processed: Arc<AtomicUsize>,
    chunks_dropped: Arc<AtomicUsize>,
}

impl TranslationSession {
    pub fn new(
        config: SessionConfig,
        backend: Arc<dyn TranslationBackend>,
        playback: Arc<PlaybackController>,
    ) -> Self {
        let pipeline = Arc::new(TranslationPipeline::new(
            Arc::clone(&backend),
            config.source_language.clone(),
            config.target_language.clone(),
            config.meeting_id.clone(),
            config.user_id.clone(),
        ));

        let accumulator = ChunkAccumulator::new(
            config.chunk_format,
            config.sample_rate,
            config.channels,
            config.min_chunk_ms,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            state: SessionState::Idle,
            backend,
            pipeline,
            playback,
            capture: None,
            monitor: None,
            accumulator: Arc::new(Mutex::new(accumulator)),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            queue_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            admitting: Arc::new(AtomicBool::new(false)),
            quota_exhausted: Arc::new(AtomicBool::new(false)),
            transcript: Arc::new(Mutex::new(Vec::new())),
            transcript_callback: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx: Some(events_rx),
            pump_task: None,
            timer_task: None,
            worker_task: None,
            started_at: None,
            chunks_submitted: Arc::new(AtomicUsize::new(0)),
            chunks_processed: Arc::new(AtomicUsize::new(0)),
            chunks_dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquire the audio source and wire capture, analyser and accumulator.
    ///
    /// A missing microphone is tolerated in degraded mode: the session still
    /// reaches Running but produces no chunks.
    pub async fn initialize(&mut self, source: AudioSource) -> Result<()> {
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "initialize called twice, ignoring");
            return Ok(());
        }
        self.state = SessionState::Initializing;

        let capture_config = self.config.capture_config();

        let capture_result = match AudioBackendFactory::create(source, capture_config) {
            Ok(mut capture) => match capture.start().await {
                Ok(frames) => Ok((capture, frames)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match capture_result {
            Ok((capture, mut frames)) => {
                capture.set_gain(self.config.initial_volume as f32 / 100.0);

                let accumulator = Arc::clone(&self.accumulator);
                self.pump_task = Some(tokio::spawn(async move {
                    while let Some(frame) = frames.recv().await {
                        accumulator
                            .lock()
                            .expect("accumulator lock poisoned")
                            .push_frame(&frame);
                    }
                    debug!("capture frame stream ended");
                }));

                let mut monitor = VolumeMonitor::new(capture.analyser());
                monitor.start();
                self.monitor = Some(monitor);
                self.capture = Some(capture);

                info!("session initialized with audio capture");
            }
            Err(e) => match self.config.startup_mode {
                StartupMode::Strict => {
                    self.state = SessionState::Idle;
                    return Err(e).context("microphone unavailable and startup mode is strict");
                }
                StartupMode::Degraded => {
                    warn!("microphone unavailable, continuing without audio: {e:#}");
                    let _ = self.events_tx.send(SessionEvent::MicrophoneUnavailable);
                }
            },
        }

        self.playback.set_volume(self.config.initial_volume);
        Ok(())
    }

    /// Start the chunk timer and the pipeline worker
    pub async fn start_translation(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running => {
                warn!("translation already running");
                return Ok(());
            }
            SessionState::Initializing => {}
            state => anyhow::bail!("cannot start translation from state {state:?}"),
        }

        self.state = SessionState::Running;
        self.started_at = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        self.admitting.store(true, Ordering::SeqCst);

        self.spawn_worker();
        self.spawn_timer();

        info!(
            meeting = self.config.meeting_id.as_deref().unwrap_or("none"),
            source = %self.config.source_language,
            target = %self.config.target_language,
            "translation started"
        );
        let _ = self.events_tx.send(SessionEvent::Started);
        Ok(())
    }

    /// Stop admission, drain queued chunks, tear down audio and close the
    /// meeting record. Safe to call repeatedly.
    pub async fn stop_translation(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle | SessionState::Stopped | SessionState::Stopping => {
                debug!(state = ?self.state, "stop is a no-op");
                return Ok(());
            }
            SessionState::Initializing => {
                self.state = SessionState::Stopping;
                self.teardown_audio().await;
                self.state = SessionState::Stopped;
                return Ok(());
            }
            SessionState::Running => {}
        }

        info!("stopping translation session");
        self.state = SessionState::Stopping;

        // No new chunks admitted from here on
        self.admitting.store(false, Ordering::SeqCst);
        if let Some(timer) = self.timer_task.take() {
            timer.abort();
        }

        // Drain: the worker processes whatever is queued, then exits
        self.running.store(false, Ordering::SeqCst);
        self.queue_notify.notify_one();

        if let Some(mut worker) = self.worker_task.take() {
            match tokio::time::timeout(self.config.stop_drain_timeout, &mut worker).await {
                Ok(_) => debug!("chunk queue drained"),
                Err(_) => {
                    warn!("queue drain timed out, abandoning remaining chunks");
                    worker.abort();
                }
            }
        }

        self.teardown_audio().await;

        if let Some(meeting_id) = &self.config.meeting_id {
            if let Err(e) = self.backend.close_meeting(meeting_id, Utc::now()).await {
                warn!("failed to record meeting end time: {}", e);
            }
        }

        self.state = SessionState::Stopped;
        info!("translation session stopped");
        let _ = self.events_tx.send(SessionEvent::Stopped);
        Ok(())
    }

    /// Set input gain and output volume together (0-100); the two remain
    /// separate controls underneath
    pub fn set_volume(&self, volume: u8) {
        let volume = volume.min(100);
        self.playback.set_volume(volume);
        if let Some(capture) = &self.capture {
            capture.set_gain(volume as f32 / 100.0);
        }
    }

    /// Register (or replace) the transcript-update callback
    pub fn on_transcript(&self, callback: impl Fn(&TranscriptEntry) + Send + 'static) {
        *self
            .transcript_callback
            .lock()
            .expect("transcript callback lock poisoned") = Some(Box::new(callback));
    }

    /// Register (or replace) the volume subscriber; effective from the next
    /// sampled frame even when capture is already running
    pub fn subscribe_volume(&self, callback: impl Fn(VolumeSample) + Send + 'static) {
        match &self.monitor {
            Some(monitor) => monitor.subscribe(callback),
            None => warn!("no volume monitor in degraded mode"),
        }
    }

    /// Pull-style access to the most recent volume sample
    pub fn volume_watch(&self) -> Option<watch::Receiver<VolumeSample>> {
        self.monitor.as_ref().map(|m| m.watch())
    }

    /// Take the session event receiver; available once
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript
            .lock()
            .expect("transcript lock poisoned")
            .clone()
    }

    pub fn stats(&self) -> SessionStats {
        let duration_secs = self
            .started_at
            .map(|t| {
                Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            state: self.state,
            started_at: self.started_at,
            duration_secs,
            chunks_submitted: self.chunks_submitted.load(Ordering::SeqCst),
            chunks_processed: self.chunks_processed.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            transcript_entries: self.transcript.lock().expect("transcript lock poisoned").len(),
        }
    }

    /// Timer task: every interval, drain the accumulator into the bounded
    /// queue and wake the worker
    fn spawn_timer(&mut self) {
        let interval = self.config.chunk_interval;
        let max_queued = self.config.max_queued_chunks;
        let accumulator = Arc::clone(&self.accumulator);
        let queue = Arc::clone(&self.queue);
        let queue_notify = Arc::clone(&self.queue_notify);
        let admitting = Arc::clone(&self.admitting);
        let submitted = Arc::clone(&self.chunks_submitted);
        let dropped = Arc::clone(&self.chunks_dropped);

        self.timer_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !admitting.load(Ordering::SeqCst) {
                    break;
                }

                let taken = accumulator
                    .lock()
                    .expect("accumulator lock poisoned")
                    .take();

                match taken {
                    Ok(Some(chunk)) => {
                        {
                            let mut queue = queue.lock().expect("chunk queue lock poisoned");
                            if queue.len() >= max_queued {
                                queue.pop_front();
                                dropped.fetch_add(1, Ordering::SeqCst);
                                warn!("chunk queue full, dropping oldest chunk");
                            }
                            queue.push_back(chunk);
                        }
                        submitted.fetch_add(1, Ordering::SeqCst);
                        queue_notify.notify_one();
                    }
                    Ok(None) => {}
                    Err(e) => error!("failed to encode chunk: {e:#}"),
                }
            }
        }));
    }

    /// Worker task: pops chunks FIFO and runs them through the pipeline one
    /// at a time. Exits when stopped and drained, or on quota exhaustion.
    fn spawn_worker(&mut self) {
        let pipeline = Arc::clone(&self.pipeline);
        let playback = Arc::clone(&self.playback);
        let queue = Arc::clone(&self.queue);
        let queue_notify = Arc::clone(&self.queue_notify);
        let running = Arc::clone(&self.running);
        let admitting = Arc::clone(&self.admitting);
        let quota_exhausted = Arc::clone(&self.quota_exhausted);
        let transcript = Arc::clone(&self.transcript);
        let transcript_callback = Arc::clone(&self.transcript_callback);
        let processed = Arc::clone(&self.chunks_processed);
        let events_tx = self.events_tx.clone();

        self.worker_task = Some(tokio::spawn(async move {
            loop {
                let next = queue
                    .lock()
                    .expect("chunk queue lock poisoned")
                    .pop_front();

                let chunk = match next {
                    Some(chunk) => chunk,
                    None => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        queue_notify.notified().await;
                        continue;
                    }
                };

                match pipeline.process(&chunk).await {
                    Ok(ChunkOutcome::Transcribed {
                        entry,
                        audio_content,
                    }) => {
                        transcript
                            .lock()
                            .expect("transcript lock poisoned")
                            .push(entry.clone());

                        if let Some(callback) = &*transcript_callback
                            .lock()
                            .expect("transcript callback lock poisoned")
                        {
                            callback(&entry);
                        }

                        if let Some(audio) = audio_content {
                            if let Err(e) = playback.play(&audio) {
                                warn!("could not play synthesized audio: {}", e);
                            }
                        }

                        processed.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(ChunkOutcome::Silence) => {
                        debug!(sequence = chunk.sequence, "silent chunk");
                    }
                    Err(PipelineError::QuotaExhausted) => {
                        warn!("translation minutes exhausted, halting chunk processing");
                        quota_exhausted.store(true, Ordering::SeqCst);
                        admitting.store(false, Ordering::SeqCst);
                        let _ = events_tx.send(SessionEvent::QuotaExhausted);
                        break;
                    }
                    Err(e) => {
                        error!(
                            payload = %truncate(&chunk.payload, 32),
                            "chunk abandoned: {e}"
                        );
                    }
                }
            }

            debug!("pipeline worker exited");
        }));
    }

    /// Ordered audio teardown; every step is independently guarded so a
    /// repeated or partial teardown never fails
    async fn teardown_audio(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }

        if let Some(pump) = self.pump_task.take() {
            pump.abort();
        }

        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop().await {
                warn!("audio teardown error (ignored): {e:#}");
            }
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.quota_exhausted.load(Ordering::SeqCst)
    }
}
