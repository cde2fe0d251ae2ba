//! Chat-completion backend.
//!
//! [`ChatModel`] is the seam between the orchestrator and the language
//! model. [`OpenAIChat`] speaks the OpenAI `/chat/completions` protocol;
//! tests substitute their own implementations.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::{AgentError, AgentResult, BackendError};
use crate::models::CredentialSet;

/// A single-shot completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the assistant reply for `request`.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError>;

    /// Check that the backend accepts our credentials without generating text.
    async fn verify(&self) -> Result<(), BackendError>;
}

/// Build the chat model bound to `credentials`.
pub fn create_chat_model(
    config: &ModelConfig,
    credentials: &CredentialSet,
) -> AgentResult<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = credentials.openai_key.clone().ok_or_else(|| {
                AgentError::Authentication("no OpenAI API key configured".to_string())
            })?;
            Ok(Arc::new(OpenAIChat::new(config, api_key)?))
        }
        other => Err(AgentError::Validation(format!(
            "unknown model provider: {}",
            other
        ))),
    }
}

pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIChat {
    pub fn new(config: &ModelConfig, api_key: String) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::DependencyUnavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
        let mut body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt }
            ]
        });
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &text));
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }

    async fn verify(&self) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(BackendError::from_status(status, &text))
        }
    }
}

/// Read `choices[0].message.content`; a null content is an empty reply.
fn parse_completion(json: &serde_json::Value) -> Result<String, BackendError> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| BackendError::InvalidResponse("missing choices[0].message".to_string()))?;

    Ok(message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Paris." } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Paris.");
    }

    #[test]
    fn null_content_is_empty_reply() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": null } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), "");
    }

    #[test]
    fn missing_choices_is_invalid() {
        let err = parse_completion(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn missing_key_is_authentication_error() {
        let err = create_chat_model(&ModelConfig::default(), &CredentialSet::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "authentication_error");
    }
}
