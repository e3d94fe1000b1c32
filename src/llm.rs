//! Language-model client used by agents that compose free text.
//!
//! The trait keeps agents independent of the provider; OpenRouter's
//! OpenAI-compatible chat completions endpoint is the shipped implementation.
//! Calls are made once: a failure is an [`ExternalServiceError`] and the agent
//! falls back to templated text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ExternalServiceError;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Trait for language-model clients.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a completion for `prompt` under `system` instructions.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ExternalServiceError>;
}

/// Role in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: Role,
    content: Option<String>,
}

/// OpenRouter API client.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ExternalServiceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExternalServiceError::new("openrouter", e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenRouterClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ExternalServiceError> {
        let request = OpenRouterRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: Some(system.to_string()),
                },
                ChatMessage {
                    role: Role::User,
                    content: Some(prompt.to_string()),
                },
            ],
            temperature: Some(0.2),
        };

        tracing::debug!("Sending request to OpenRouter: model={}", self.model);

        let response = self
            .client
            .post(OPENROUTER_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Title", "carewatch")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() {
                    "Request timeout"
                } else if e.is_connect() {
                    "Connection failed"
                } else {
                    "Request failed"
                };
                ExternalServiceError::new("openrouter", format!("{}: {}", what, e))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ExternalServiceError::new(
                "openrouter",
                format!("{} - {}", status, body),
            ));
        }

        parse_completion(&body)
    }
}

fn parse_completion(body: &str) -> Result<String, ExternalServiceError> {
    let parsed: OpenRouterResponse = serde_json::from_str(body).map_err(|e| {
        ExternalServiceError::new("openrouter", format!("Failed to parse response: {}", e))
    })?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ExternalServiceError::new("openrouter", "No content in response"))
}

/// OpenRouter API request format.
#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// OpenRouter API response format.
#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
}

/// A choice in the OpenRouter response.
#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Brief.  "}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Brief.");
    }

    #[test]
    fn test_parse_completion_empty() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(parse_completion(body).is_err());
        assert!(parse_completion(r#"{"choices":[]}"#).is_err());
        assert!(parse_completion("<html>").is_err());
    }
}
