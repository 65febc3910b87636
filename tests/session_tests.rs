// Full session lifecycle against a scripted backend and a WAV capture
// source: ordering, serialization, stop semantics, quota and volume.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tempfile::TempDir;
use tokio::sync::mpsc;

use babelmeet::audio::{AudioSource, NullSink, PlaybackController};
use babelmeet::session::{
    SessionConfig, SessionEvent, SessionState, StartupMode, TranslationSession,
};
use common::{write_test_wav, FakeBackend, RecordingSink};

fn playback() -> Arc<PlaybackController> {
    Arc::new(PlaybackController::new(Arc::new(NullSink), 70))
}

fn test_config(meeting_id: Option<&str>) -> SessionConfig {
    SessionConfig {
        meeting_id: meeting_id.map(String::from),
        user_id: "user-1".to_string(),
        chunk_interval: Duration::from_millis(100),
        min_chunk_ms: 20,
        ..SessionConfig::default()
    }
}

fn wav_source(dir: &TempDir, duration_ms: u64) -> AudioSource {
    let path = dir.path().join("input.wav");
    write_test_wav(&path, duration_ms);
    AudioSource::File {
        path: path.display().to_string(),
        paced: true,
    }
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_transcript_preserves_chunk_order() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));

    let mut session =
        TranslationSession::new(test_config(None), backend.clone(), playback());
    session.initialize(wav_source(&dir, 800)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    session.stop_translation().await.unwrap();

    let transcript = session.transcript();
    assert!(transcript.len() >= 2, "expected multiple chunks, got {}", transcript.len());

    // The fake numbers transcriptions in call order; any reordering or
    // interleaving would break the sequence
    for (i, entry) in transcript.iter().enumerate() {
        assert_eq!(entry.original, format!("utterance {i}"));
        assert_eq!(entry.translated, format!("[es] utterance {i}"));
    }
}

#[tokio::test]
async fn test_chunks_are_processed_one_at_a_time() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));
    backend.set_stage_delay(Duration::from_millis(25));

    let mut session =
        TranslationSession::new(test_config(None), backend.clone(), playback());
    session.initialize(wav_source(&dir, 800)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    session.stop_translation().await.unwrap();

    assert!(session.stats().chunks_processed >= 2);
    assert_eq!(
        backend.max_in_flight.load(Ordering::SeqCst),
        1,
        "remote calls must never overlap"
    );
}

#[tokio::test]
async fn test_stop_is_idempotent_and_closes_meeting_once() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));

    let mut session = TranslationSession::new(
        test_config(Some("meeting-7")),
        backend.clone(),
        playback(),
    );
    session.initialize(wav_source(&dir, 300)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop_translation().await.unwrap();
    session.stop_translation().await.unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(backend.closed_meetings.lock().unwrap().as_slice(), ["meeting-7"]);
}

#[tokio::test]
async fn test_stop_before_initialize_is_a_noop() {
    let backend = Arc::new(FakeBackend::new(100));
    let mut session =
        TranslationSession::new(test_config(None), backend.clone(), playback());

    session.stop_translation().await.unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert!(backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_quota_exhaustion_emits_event_and_halts_processing() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(1));

    let mut session =
        TranslationSession::new(test_config(None), backend.clone(), playback());
    let mut events = session.events().unwrap();

    session.initialize(wav_source(&dir, 1000)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    session.stop_translation().await.unwrap();

    let events = drain_events(&mut events);
    assert!(events.contains(&SessionEvent::QuotaExhausted));

    // one chunk got through; the failed quota check stopped everything after
    assert_eq!(backend.calls_named("transcribe"), 1);
    assert!(session.is_quota_exhausted());
}

#[tokio::test]
async fn test_degraded_startup_runs_without_audio() {
    let mut config = test_config(None);
    config.startup_mode = StartupMode::Degraded;

    let backend = Arc::new(FakeBackend::new(100));
    let mut session = TranslationSession::new(config, backend.clone(), playback());
    let mut events = session.events().unwrap();

    session
        .initialize(AudioSource::File {
            path: "/nonexistent/input.wav".to_string(),
            paced: false,
        })
        .await
        .unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    session.stop_translation().await.unwrap();

    let events = drain_events(&mut events);
    assert!(events.contains(&SessionEvent::MicrophoneUnavailable));
    assert_eq!(session.stats().chunks_submitted, 0);
}

#[tokio::test]
async fn test_strict_startup_refuses_to_run_without_audio() {
    let mut config = test_config(None);
    config.startup_mode = StartupMode::Strict;

    let backend = Arc::new(FakeBackend::new(100));
    let mut session = TranslationSession::new(config, backend, playback());

    let result = session
        .initialize(AudioSource::File {
            path: "/nonexistent/input.wav".to_string(),
            paced: false,
        })
        .await;

    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_set_volume_updates_playback_and_clamps() {
    let backend = Arc::new(FakeBackend::new(100));
    let playback = playback();
    let session =
        TranslationSession::new(test_config(None), backend, Arc::clone(&playback));

    session.set_volume(35);
    assert_eq!(playback.volume(), 35);

    session.set_volume(200);
    assert_eq!(playback.volume(), 100);
}

#[tokio::test]
async fn test_volume_monitor_reports_levels_during_session() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));

    let mut session =
        TranslationSession::new(test_config(None), backend, playback());
    session.initialize(wav_source(&dir, 500)).await.unwrap();

    // subscribing after capture started must still deliver samples
    let samples_seen = Arc::new(AtomicUsize::new(0));
    let speech_seen = Arc::new(AtomicUsize::new(0));
    {
        let samples_seen = Arc::clone(&samples_seen);
        let speech_seen = Arc::clone(&speech_seen);
        session.subscribe_volume(move |sample| {
            samples_seen.fetch_add(1, Ordering::SeqCst);
            if sample.is_speaking {
                speech_seen.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    session.start_translation().await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    session.stop_translation().await.unwrap();

    assert!(samples_seen.load(Ordering::SeqCst) > 0);
    assert!(speech_seen.load(Ordering::SeqCst) > 0, "tone input should register as speech");
}

#[tokio::test]
async fn test_round_trip_plays_synthesized_audio() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));
    backend.script_transcriptions(&["Our results show growth in Asia."]);
    let synthesized = base64::engine::general_purpose::STANDARD.encode(b"mp3-bytes");
    backend.set_synth_audio(&synthesized);

    let sink = Arc::new(RecordingSink::new());
    let playback = Arc::new(PlaybackController::new(sink.clone(), 70));

    let mut session =
        TranslationSession::new(test_config(Some("meeting-3")), backend.clone(), playback);
    session.initialize(wav_source(&dir, 400)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    session.stop_translation().await.unwrap();

    let transcript = session.transcript();
    assert!(!transcript.is_empty());
    assert_eq!(transcript[0].original, "Our results show growth in Asia.");
    assert_eq!(
        transcript[0].translated,
        "[es] Our results show growth in Asia."
    );
    assert!(!backend.persisted.lock().unwrap().is_empty());

    let plays = sink.plays.lock().unwrap();
    assert!(!plays.is_empty(), "synthesized audio was never played");
    assert_eq!(plays[0].0, b"mp3-bytes");
    assert!((plays[0].1 - 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_full_queue_drops_oldest_chunk() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(FakeBackend::new(100));
    backend.set_stage_delay(Duration::from_millis(150));

    let mut config = test_config(None);
    config.max_queued_chunks = 1;

    let mut session = TranslationSession::new(config, backend, playback());
    session.initialize(wav_source(&dir, 1000)).await.unwrap();
    session.start_translation().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1300)).await;
    session.stop_translation().await.unwrap();

    let stats = session.stats();
    assert!(stats.chunks_dropped >= 1, "expected drops, stats: {stats:?}");
    assert!(stats.chunks_processed >= 1);
}
