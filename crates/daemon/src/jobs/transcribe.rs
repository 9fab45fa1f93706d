use async_trait::async_trait;
use engine::InputRef;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::TranscriptionError;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Raw recognized text for an audio or video input.
    async fn transcribe(&self, input: &InputRef) -> Result<String, TranscriptionError>;
}

/// Collapse whitespace runs and make sure the transcript ends a sentence.
pub fn clean_transcript(raw: &str) -> Result<String, TranscriptionError> {
    let mut text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Err(TranscriptionError::new("no speech detected"));
    }
    if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    Ok(text)
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
}

/// Client for the ML service's `/transcribe` endpoint.
pub struct HttpSpeechToText {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpSpeechToText {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        HttpSpeechToText {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, input: &InputRef) -> Result<String, TranscriptionError> {
        let media_path = input
            .media_path()
            .ok_or_else(|| TranscriptionError::new("text input has no media to transcribe"))?;

        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "mediaPath": media_path }))
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("speech service unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(TranscriptionError::new(format!(
                "speech service returned {}",
                response.status()
            )));
        }

        let body: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::new(format!("bad speech service response: {}", e)))?;
        let text = body.text.unwrap_or_default();
        debug!(media_path, chars = text.len(), "transcription received");
        Ok(text)
    }
}
