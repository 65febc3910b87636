// Remote collaborator contracts.
//
// Every stage of the pipeline is a serverless function on the hosted
// backend, reached over HTTPS. The trait keeps the pipeline testable; the
// HTTP implementation mirrors the deployed function routes and their JSON
// shapes.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// One original/translated pair, as persisted against a meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptData {
    pub original: String,
    pub translated: String,
}

#[derive(Debug, Error)]
pub enum BackendError {
    /// The account has no translation minutes left
    #[error("no translation minutes available")]
    QuotaExhausted,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {message}")]
    Api {
        endpoint: &'static str,
        status: u16,
        message: String,
    },
}

/// The remote stages the pipeline drives, one method per collaborator call
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Atomic "decrement if positive" on the user's minute balance; returns
    /// the remaining minutes
    async fn decrement_quota(&self, user_id: &str) -> Result<i64, BackendError>;

    /// Speech-to-text; an empty string means silence, not failure
    async fn transcribe(&self, audio: &str, source_language: &str) -> Result<String, BackendError>;

    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, BackendError>;

    /// Text-to-speech; returns base64 audio, empty means nothing to play
    async fn synthesize(&self, text: &str, target_language: &str) -> Result<String, BackendError>;

    /// Fire-and-forget append to the meeting history
    async fn persist_transcript(
        &self,
        meeting_id: &str,
        entry: &TranscriptData,
        target_language: &str,
    ) -> Result<(), BackendError>;

    /// Record the meeting end time when a session stops
    async fn close_meeting(
        &self,
        meeting_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), BackendError>;
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio: &'a str,
    #[serde(rename = "sourceLanguage")]
    source_language: &'a str,
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    #[serde(rename = "sourceLanguage")]
    source_language: &'a str,
    #[serde(rename = "targetLanguage")]
    target_language: &'a str,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(rename = "targetLanguage")]
    target_language: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent", default)]
    audio_content: String,
}

#[derive(Debug, Serialize)]
struct QuotaRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    remaining: i64,
}

#[derive(Debug, Serialize)]
struct PersistRequest<'a> {
    #[serde(rename = "meetingId")]
    meeting_id: &'a str,
    original: &'a str,
    translated: &'a str,
    language: &'a str,
}

#[derive(Debug, Serialize)]
struct CloseMeetingRequest<'a> {
    #[serde(rename = "meetingId")]
    meeting_id: &'a str,
    #[serde(rename = "endedAt")]
    ended_at: String,
}

#[derive(Debug, Deserialize)]
struct EmptyResponse {}

// ============================================================================
// HTTP implementation
// ============================================================================

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        info!("translation backend at {}", base_url);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn invoke<B, R>(&self, function: &'static str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/functions/v1/{}", self.base_url, function);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The quota function answers 402 when the balance is spent
            if status.as_u16() == 402 {
                return Err(BackendError::QuotaExhausted);
            }
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                endpoint: function,
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl TranslationBackend for HttpBackend {
    async fn decrement_quota(&self, user_id: &str) -> Result<i64, BackendError> {
        let response: QuotaResponse = self
            .invoke("decrement-minutes", &QuotaRequest { user_id })
            .await?;
        Ok(response.remaining)
    }

    async fn transcribe(&self, audio: &str, source_language: &str) -> Result<String, BackendError> {
        let response: TextResponse = self
            .invoke(
                "speech-to-text",
                &TranscribeRequest {
                    audio,
                    source_language,
                },
            )
            .await?;
        Ok(response.text)
    }

    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, BackendError> {
        let response: TextResponse = self
            .invoke(
                "translate-text",
                &TranslateRequest {
                    text,
                    source_language,
                    target_language,
                },
            )
            .await?;
        Ok(response.text)
    }

    async fn synthesize(&self, text: &str, target_language: &str) -> Result<String, BackendError> {
        let response: SynthesizeResponse = self
            .invoke(
                "text-to-speech",
                &SynthesizeRequest {
                    text,
                    target_language,
                },
            )
            .await?;
        Ok(response.audio_content)
    }

    async fn persist_transcript(
        &self,
        meeting_id: &str,
        entry: &TranscriptData,
        target_language: &str,
    ) -> Result<(), BackendError> {
        let _: EmptyResponse = self
            .invoke(
                "save-transcript",
                &PersistRequest {
                    meeting_id,
                    original: &entry.original,
                    translated: &entry.translated,
                    language: target_language,
                },
            )
            .await?;
        Ok(())
    }

    async fn close_meeting(
        &self,
        meeting_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let _: EmptyResponse = self
            .invoke(
                "close-meeting",
                &CloseMeetingRequest {
                    meeting_id,
                    ended_at: ended_at.to_rfc3339(),
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shapes_use_camel_case_fields() {
        let request = TranslateRequest {
            text: "hello",
            source_language: "en",
            target_language: "es",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sourceLanguage"], "en");
        assert_eq!(json["targetLanguage"], "es");
    }

    #[test]
    fn test_missing_text_field_defaults_to_empty() {
        let response: TextResponse = serde_json::from_str("{}").unwrap();
        assert!(response.text.is_empty());
    }

    #[test]
    fn test_synthesize_response_field_name() {
        let response: SynthesizeResponse =
            serde_json::from_str(r#"{"audioContent":"QUJD"}"#).unwrap();
        assert_eq!(response.audio_content, "QUJD");
    }
}
