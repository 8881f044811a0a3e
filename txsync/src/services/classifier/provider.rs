//! Classification provider seam
//!
//! The batch classifier sends one free-form prompt per call and gets free-form
//! text back. [`ChatCompletionsProvider`] talks to an OpenAI-compatible
//! chat-completions endpoint.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Default request ceiling when none is configured
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;

/// Classification provider errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No API key configured")]
    MissingApiKey,
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        ClassifierError::Network(err.to_string())
    }
}

/// Sends a prompt, returns the model's raw text
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    /// Provider name recorded with every classification and feedback entry
    fn provider_name(&self) -> &str;

    /// Model identifier recorded with every classification
    fn model_version(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions HTTP client with a request-rate ceiling
pub struct ChatCompletionsProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl ChatCompletionsProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        requests_per_minute: u32,
    ) -> Result<Self, ClassifierError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClassifierError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let per_minute = NonZeroU32::new(requests_per_minute)
            .or_else(|| NonZeroU32::new(DEFAULT_REQUESTS_PER_MINUTE))
            .ok_or(ClassifierError::Parse("invalid rate limit".to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }
}

#[async_trait]
impl ClassificationProvider for ChatCompletionsProvider {
    fn provider_name(&self) -> &str {
        "chat-completions"
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        self.rate_limiter.until_ready().await;

        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {
                    "role": "system",
                    "content": "You classify personal communications. Reply with JSON only."
                },
                { "role": "user", "content": prompt }
            ]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::Parse("response has no message content".to_string()))
    }
}
