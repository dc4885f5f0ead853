use std::future::Future;

use crate::error::{ExtractionError, Result};

/// The single capability the adjudicator needs from any model endpoint.
pub trait LlmProvider: Send + Sync {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Provider used when no endpoint is configured; every call fails, which
/// routes the adjudicator to its highest-confidence fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

impl LlmProvider for NullProvider {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(ExtractionError::AdjudicationFailure(
            "no LLM provider configured".to_string(),
        ))
    }
}

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;

#[cfg(feature = "openai")]
mod openai {
    use std::time::Duration;

    use log::warn;
    use serde::{Deserialize, Serialize};
    use tokio::time::sleep;

    use crate::config::LlmConfig;
    use crate::error::{ExtractionError, Result};

    use super::LlmProvider;

    const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

    #[derive(Serialize)]
    struct ChatMessage {
        role: &'static str,
        content: String,
    }

    #[derive(Serialize)]
    struct ChatRequest {
        model: String,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: u32,
    }

    #[derive(Deserialize)]
    struct ChatChoiceMessage {
        content: Option<String>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatChoiceMessage,
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<ChatChoice>,
    }

    /// Chat-completions client for OpenAI-compatible endpoints.
    #[derive(Clone)]
    pub struct OpenAiClient {
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        config: LlmConfig,
    }

    impl OpenAiClient {
        pub fn new(api_key: String, config: LlmConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .map_err(|e| ExtractionError::ConfigInvalid(e.to_string()))?;

            Ok(Self {
                client,
                api_key,
                base_url: DEFAULT_BASE_URL.to_string(),
                config,
            })
        }

        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        async fn request_once(&self, prompt: &str) -> Result<String> {
            let payload = ChatRequest {
                model: self.config.model.clone(),
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: "You are a financial data extraction expert.".to_string(),
                    },
                    ChatMessage {
                        role: "user",
                        content: prompt.to_string(),
                    },
                ],
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await
                .map_err(|e| ExtractionError::AdjudicationFailure(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(ExtractionError::AdjudicationFailure(format!(
                    "API request failed ({status}): {body}"
                )));
            }

            let body: ChatResponse = response
                .json()
                .await
                .map_err(|e| ExtractionError::AdjudicationFailure(e.to_string()))?;

            body.choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| {
                    ExtractionError::AdjudicationFailure("empty completion".to_string())
                })
        }
    }

    impl LlmProvider for OpenAiClient {
        async fn generate(&self, prompt: &str) -> Result<String> {
            let mut last_error = None;

            for attempt in 0..=self.config.max_retries {
                if attempt > 0 {
                    sleep(Duration::from_secs(2u64.saturating_pow(attempt - 1))).await;
                }
                match self.request_once(prompt).await {
                    Ok(content) => return Ok(content),
                    Err(e) => {
                        warn!("LLM request attempt {} failed: {e}", attempt + 1);
                        last_error = Some(e);
                    }
                }
            }

            Err(last_error.unwrap_or_else(|| {
                ExtractionError::AdjudicationFailure("no attempts made".to_string())
            }))
        }
    }
}
