//! Google Gemini text model implementation.
//!
//! Minimal `TextModel` over the generateContent REST API; this is the
//! prompt-drafting service, not part of the core pipeline, and the
//! extraction layer is expected to cope with whatever it returns.

use async_trait::async_trait;
use cartwatch_abstraction::{ModelError, TextModel};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini model implementation.
#[derive(Debug, Clone)]
pub struct GeminiTextModel {
    /// The model ID (e.g., "gemini-2.0-flash").
    model_id: String,
    /// The API key for authentication.
    api_key: String,
    /// HTTP client for making requests.
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiTextModel {
    /// Creates a new model reading the API key from `GEMINI_API_KEY`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the environment variable is not set.
    pub fn new(model_id: String) -> Result<Self, ModelError> {
        let api_key = env::var("GEMINI_API_KEY").map_err(|_| {
            ModelError::RequestError("GEMINI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::with_api_key(model_id, api_key))
    }

    /// Creates a new model with an explicit API key.
    #[must_use]
    pub fn with_api_key(model_id: String, api_key: String) -> Self {
        Self { model_id, api_key, client: Client::new() }
    }
}

#[async_trait]
impl TextModel for GeminiTextModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        debug!(model_id = %self.model_id, prompt_len = prompt.len(), "Gemini generating text");

        let url =
            format!("{BASE_URL}/models/{}:generateContent?key={}", self.model_id, self.api_key);
        let request = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: prompt.to_string() }] }],
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::RequestError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::ModelResponseError(format!(
                "Gemini API returned {status}: {body}"
            )));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| ModelError::ModelResponseError(e.to_string()))?;

        parsed
            .candidates
            .and_then(|mut candidates| {
                if candidates.is_empty() { None } else { Some(candidates.remove(0)) }
            })
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                ModelError::ModelResponseError("response contained no candidates".to_string())
            })
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_accessor() {
        let model =
            GeminiTextModel::with_api_key("gemini-2.0-flash".to_string(), "key".to_string());
        assert_eq!(model.model_id(), "gemini-2.0-flash");
    }
}
