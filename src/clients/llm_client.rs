//! Text generation client
//!
//! Talks to an OpenAI-compatible completions endpoint, such as the one served by
//! llama.cpp's `server` for a local GGUF model.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::info;

use crate::core::config::LlmConfig;
use crate::errors::EnrichError;
use crate::prompt::PromptTemplate;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a non-empty artifact text for `topic`.
    async fn generate(&self, topic: &str) -> Result<String, EnrichError>;
}

pub struct LlmClient {
    http: Client,
    completions_url: String,
    api_key: Option<String>,
    model_name: Option<String>,
    template: Arc<dyn PromptTemplate>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig, template: Arc<dyn PromptTemplate>) -> Self {
        Self {
            http: Client::new(),
            completions_url: format!("{}/v1/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model_name: config.model.clone(),
            template,
        }
    }

    pub fn build_request(&self, topic: &str) -> Value {
        let sampling = self.template.sampling();
        let mut body = json!({
            "prompt": self.template.render(topic),
            "max_tokens": sampling.max_tokens,
            "temperature": sampling.temperature,
            "repeat_penalty": sampling.repeat_penalty,
            "stop": sampling.stop,
        });
        if let Some(model) = &self.model_name {
            body["model"] = json!(model);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, topic: &str) -> Result<String, EnrichError> {
        let body = self.build_request(topic);

        #[cfg(feature = "debug-logs")]
        info!("Using completion request:\n{}", body);

        #[cfg(not(feature = "debug-logs"))]
        info!(topic = topic, "Generating text");

        let mut request = self.http.post(&self.completions_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EnrichError::GenerationError(format!("completion request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(EnrichError::GenerationError(format!(
                "model server returned {status}: {error_text}"
            )));
        }

        let response_json: Value = response.json().await.map_err(|e| {
            EnrichError::GenerationError(format!("Failed to parse completion response: {e}"))
        })?;

        extract_completion_text(&response_json)
    }
}

/// First non-empty choice text, trimmed.
///
/// Accepts both the completions shape (`choices[].text`) and the chat shape
/// (`choices[].message.content`).
pub fn extract_completion_text(response: &Value) -> Result<String, EnrichError> {
    let text = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| {
            choice
                .get("text")
                .or_else(|| choice.get("message").and_then(|m| m.get("content")))
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if text.is_empty() {
        Err(EnrichError::GenerationError(
            "No text in completion response".to_string(),
        ))
    } else {
        Ok(text.to_string())
    }
}
