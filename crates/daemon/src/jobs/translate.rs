use async_trait::async_trait;
use engine::GlossToken;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TranslationError;

#[async_trait]
pub trait TextToGloss: Send + Sync {
    async fn translate(&self, text: &str) -> Result<Vec<GlossToken>, TranslationError>;
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(default)]
    glosses: Vec<String>,
}

/// Client for the ML service's `/translate` endpoint.
pub struct HttpTextToGloss {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTextToGloss {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        HttpTextToGloss {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

/// Normalize raw glosses, dropping the ones that normalize to nothing.
pub fn tokens_from_glosses(raw: &[String]) -> Vec<GlossToken> {
    raw.iter()
        .filter_map(|g| match GlossToken::new(g) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(gloss = %g, error = %e, "dropping unusable gloss");
                None
            }
        })
        .collect()
}

#[async_trait]
impl TextToGloss for HttpTextToGloss {
    async fn translate(&self, text: &str) -> Result<Vec<GlossToken>, TranslationError> {
        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| TranslationError::new(format!("translation service unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(TranslationError::new(format!(
                "translation service returned {}",
                response.status()
            )));
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::new(format!("bad translation service response: {}", e)))?;
        let tokens = tokens_from_glosses(&body.glosses);
        if tokens.is_empty() {
            return Err(TranslationError::new("no glosses produced"));
        }
        debug!(glosses = tokens.len(), "translation received");
        Ok(tokens)
    }
}
