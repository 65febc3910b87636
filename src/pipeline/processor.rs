// Per-chunk processing: quota gate, transcribe, translate, synthesize,
// persist. Stages run strictly in order; a failure abandons the chunk and
// nothing carries over to the next one.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::EncodedChunk;
use crate::session::TranscriptEntry;

use super::remote::{BackendError, TranscriptData, TranslationBackend};

/// Outcome of processing one chunk
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Speech was found; the entry has already been persisted externally
    Transcribed {
        entry: TranscriptEntry,
        /// Base64 synthesized audio; None when the service returned nothing
        audio_content: Option<String>,
    },
    /// No speech in this chunk; downstream stages were skipped
    Silence,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Hard stop condition: no stage after the quota gate ran
    #[error("no translation minutes available")]
    QuotaExhausted,

    /// A remote stage failed; the chunk was abandoned, the session continues
    #[error("{stage} failed for chunk {sequence}: {source}")]
    Stage {
        stage: &'static str,
        sequence: u64,
        #[source]
        source: BackendError,
    },
}

/// Drives the cascading remote calls for one chunk at a time.
///
/// Serialization is structural: the session owns a single worker that calls
/// `process`, so at most one chunk is ever in flight.
pub struct TranslationPipeline {
    backend: Arc<dyn TranslationBackend>,
    source_language: String,
    target_language: String,
    meeting_id: Option<String>,
    user_id: String,
}

impl TranslationPipeline {
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        meeting_id: Option<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            source_language: source_language.into(),
            target_language: target_language.into(),
            meeting_id,
            user_id: user_id.into(),
        }
    }

    /// Process one chunk through quota gate and the three remote stages.
    ///
    /// Empty transcription is silence, not an error. Persist failures are
    /// logged and do not fail the chunk.
    pub async fn process(&self, chunk: &EncodedChunk) -> Result<ChunkOutcome, PipelineError> {
        let sequence = chunk.sequence;

        let remaining = self
            .backend
            .decrement_quota(&self.user_id)
            .await
            .map_err(|e| match e {
                BackendError::QuotaExhausted => PipelineError::QuotaExhausted,
                source => PipelineError::Stage {
                    stage: "quota",
                    sequence,
                    source,
                },
            })?;
        debug!(sequence, remaining, "quota decremented");

        let original = self
            .backend
            .transcribe(&chunk.payload, &self.source_language)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: "transcribe",
                sequence,
                source,
            })?;

        if original.trim().is_empty() {
            debug!(sequence, "no speech detected in this chunk");
            return Ok(ChunkOutcome::Silence);
        }
        info!(sequence, text = %truncate(&original, 60), "speech detected");

        let translated = self
            .backend
            .translate(&original, &self.source_language, &self.target_language)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: "translate",
                sequence,
                source,
            })?;
        debug!(sequence, text = %truncate(&translated, 60), "translated");

        let audio_content = self
            .backend
            .synthesize(&translated, &self.target_language)
            .await
            .map_err(|source| PipelineError::Stage {
                stage: "synthesize",
                sequence,
                source,
            })?;
        let audio_content = if audio_content.is_empty() {
            None
        } else {
            Some(audio_content)
        };

        let entry = TranscriptEntry {
            original,
            translated,
            timestamp: Utc::now(),
        };

        if let Some(meeting_id) = &self.meeting_id {
            let data = TranscriptData {
                original: entry.original.clone(),
                translated: entry.translated.clone(),
            };
            if let Err(e) = self
                .backend
                .persist_transcript(meeting_id, &data, &self.target_language)
                .await
            {
                // fire-and-forget: the entry still counts locally
                warn!(sequence, "failed to persist transcript: {}", e);
            }
        }

        Ok(ChunkOutcome::Transcribed {
            entry,
            audio_content,
        })
    }
}

/// Shorten a payload or text for log lines
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
