//! HTTP inference backend (OpenAI-compatible chat completions).

use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{encode_frame, InferenceError, VlmClient};

/// Generation is the longest-running step in the system - a large scan can
/// take tens of seconds on a busy accelerator.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for the HTTP inference backend.
#[derive(Debug, Clone)]
pub struct VlmConfig {
    /// Chat-completions endpoint URL.
    pub endpoint: String,
    /// Model identifier passed through to the backend.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Maximum new tokens per generation.
    pub max_new_tokens: u32,
}

/// `VlmClient` backed by an OpenAI-compatible chat-completions API.
pub struct HttpVlmClient {
    client: reqwest::Client,
    config: VlmConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpVlmClient {
    pub fn new(config: VlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }
}

#[async_trait]
impl VlmClient for HttpVlmClient {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        frames: &[DynamicImage],
        prompt: &str,
    ) -> Result<String, InferenceError> {
        // One user turn: prompt text first, then every frame in order.
        let mut content = vec![json!({"type": "text", "text": prompt})];
        for frame in frames {
            let uri = encode_frame(frame)?;
            content.push(json!({"type": "image_url", "image_url": {"url": uri}}));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": self.config.max_new_tokens,
            // Deterministic decoding: greedy, no sampling.
            "temperature": 0,
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                detail,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        // The API returns only the continuation; input tokens are not echoed.
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(InferenceError::EmptyCompletion);
        }
        Ok(text)
    }
}
