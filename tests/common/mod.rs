#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use babelmeet::pipeline::{BackendError, TranscriptData, TranslationBackend};

/// Scripted stand-in for the hosted backend.
///
/// Records every remote call in order, serves scripted (or auto-numbered)
/// transcriptions, and tracks how many calls were ever in flight at once.
pub struct FakeBackend {
    pub calls: Mutex<Vec<String>>,
    pub quota: AtomicI64,
    pub persisted: Mutex<Vec<TranscriptData>>,
    pub closed_meetings: Mutex<Vec<String>>,
    pub max_in_flight: AtomicUsize,

    scripted: Mutex<VecDeque<String>>,
    synth_audio: Mutex<String>,
    transcribe_counter: AtomicUsize,
    fail_stage: Mutex<Option<&'static str>>,
    stage_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new(quota: i64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            quota: AtomicI64::new(quota),
            persisted: Mutex::new(Vec::new()),
            closed_meetings: Mutex::new(Vec::new()),
            max_in_flight: AtomicUsize::new(0),
            scripted: Mutex::new(VecDeque::new()),
            synth_audio: Mutex::new(String::new()),
            transcribe_counter: AtomicUsize::new(0),
            fail_stage: Mutex::new(None),
            stage_delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue exact transcriptions; once exhausted the backend falls back to
    /// auto-numbered "utterance N" responses
    pub fn script_transcriptions(&self, texts: &[&str]) {
        let mut scripted = self.scripted.lock().unwrap();
        scripted.extend(texts.iter().map(|t| t.to_string()));
    }

    /// Base64 payload returned by every synthesize call; empty by default
    pub fn set_synth_audio(&self, base64_audio: &str) {
        *self.synth_audio.lock().unwrap() = base64_audio.to_string();
    }

    /// Make the named stage fail with a scripted server error
    pub fn set_fail_stage(&self, stage: Option<&'static str>) {
        *self.fail_stage.lock().unwrap() = stage;
    }

    /// Delay every call, to surface any accidental concurrency
    pub fn set_stage_delay(&self, delay: Duration) {
        *self.stage_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    async fn enter(&self, name: &'static str) -> Result<InFlightGuard<'_>, BackendError> {
        self.calls.lock().unwrap().push(name.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlightGuard { backend: self };

        let delay = *self.stage_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_stage.lock().unwrap() == Some(name) {
            return Err(BackendError::Api {
                endpoint: name,
                status: 500,
                message: "scripted failure".to_string(),
            });
        }

        Ok(guard)
    }
}

pub struct InFlightGuard<'a> {
    backend: &'a FakeBackend,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.backend.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TranslationBackend for FakeBackend {
    async fn decrement_quota(&self, _user_id: &str) -> Result<i64, BackendError> {
        let _guard = self.enter("quota").await?;

        let remaining = self.quota.load(Ordering::SeqCst);
        if remaining <= 0 {
            return Err(BackendError::QuotaExhausted);
        }
        self.quota.store(remaining - 1, Ordering::SeqCst);
        Ok(remaining - 1)
    }

    async fn transcribe(
        &self,
        _audio: &str,
        _source_language: &str,
    ) -> Result<String, BackendError> {
        let _guard = self.enter("transcribe").await?;

        if let Some(text) = self.scripted.lock().unwrap().pop_front() {
            return Ok(text);
        }
        let n = self.transcribe_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("utterance {n}"))
    }

    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
    ) -> Result<String, BackendError> {
        let _guard = self.enter("translate").await?;
        Ok(format!("[{target_language}] {text}"))
    }

    async fn synthesize(&self, _text: &str, _target_language: &str) -> Result<String, BackendError> {
        let _guard = self.enter("synthesize").await?;
        Ok(self.synth_audio.lock().unwrap().clone())
    }

    async fn persist_transcript(
        &self,
        _meeting_id: &str,
        entry: &TranscriptData,
        _target_language: &str,
    ) -> Result<(), BackendError> {
        let _guard = self.enter("persist").await?;
        self.persisted.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn close_meeting(
        &self,
        meeting_id: &str,
        _ended_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let _guard = self.enter("close").await?;
        self.closed_meetings.lock().unwrap().push(meeting_id.to_string());
        Ok(())
    }
}

/// Captures playback calls instead of touching an output device
pub struct RecordingSink {
    pub plays: Mutex<Vec<(Vec<u8>, f32)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            plays: Mutex::new(Vec::new()),
        }
    }
}

impl babelmeet::audio::AudioSink for RecordingSink {
    fn play(&self, audio: Vec<u8>, volume: f32) -> anyhow::Result<()> {
        self.plays.lock().unwrap().push((audio, volume));
        Ok(())
    }
}

/// Write a sine-tone WAV (16kHz mono i16) for use as a capture source
pub fn write_test_wav(path: &Path, duration_ms: u64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total = 16000 * duration_ms / 1000;
    for i in 0..total {
        let t = i as f32 / 16000.0;
        let sample = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}
