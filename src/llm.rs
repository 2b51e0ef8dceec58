//! Generative-text backend clients.
//!
//! Both the query synthesizer and the insight narrator talk to the backend
//! through [`TextGenerator`], so tests and alternative vendors plug in at one
//! seam.

use crate::config::{LlmConfig, Provider};
use crate::error::{LlmError, PipelineError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A stateless prompt-in, completion-out text backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError>;

    fn model(&self) -> &str;

    /// Ask for a fixed reply to check credentials and connectivity.
    async fn ping(&self) -> bool {
        match self.generate("Hello, respond with 'API Working'").await {
            Ok(text) => text.contains("API Working"),
            Err(e) => {
                warn!("LLM connection test failed: {}", e);
                false
            }
        }
    }
}

/// Build the configured backend.
pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match config.provider {
        Provider::OpenAi => Arc::new(LlmClient::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
            config.timeout_secs,
        )?),
        Provider::Gemini => Arc::new(GeminiClient::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
            config.timeout_secs,
        )?),
    };
    Ok(generator)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn transport_error(e: reqwest::Error, timeout_secs: u64) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout_secs)
    } else {
        LlmError::Transport(e.to_string())
    }
}

async fn read_json(
    response: reqwest::Response,
    timeout_secs: u64,
) -> std::result::Result<serde_json::Value, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(LlmError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let response_json: serde_json::Value = response.json().await.map_err(|e| {
        if e.is_timeout() {
            LlmError::Timeout(timeout_secs)
        } else {
            LlmError::Malformed(e.to_string())
        }
    })?;

    if let Some(error) = response_json.get("error") {
        return Err(LlmError::Status {
            status: status.as_u16(),
            body: error.to_string(),
        });
    }

    Ok(response_json)
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            api_key,
            base_url,
            model,
            timeout_secs,
            client: http_client(timeout_secs)?,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.1,
        });

        // Reasoning models spend completion tokens on reasoning
        if self.model.starts_with("gpt-5") || self.model.contains("o1") {
            body["max_completion_tokens"] = json!(4000);
        } else if self.model.starts_with("gpt-4") {
            body["max_completion_tokens"] = json!(2000);
        } else {
            body["max_tokens"] = json!(2000);
        }
        body
    }

    fn extract_content(response_json: &serde_json::Value) -> std::result::Result<String, LlmError> {
        let choices = response_json
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::Malformed(format!("No choices array in LLM response: {}", response_json)))?;

        let first = choices.first().ok_or(LlmError::EmptyCompletion)?;

        match first.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("LLM response was truncated due to length limit"),
            Some("content_filter") => return Err(LlmError::ContentFiltered),
            _ => {}
        }

        let content = first["message"]["content"].as_str().unwrap_or("");
        if content.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(content.to_string())
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        debug!("Calling {} ({} prompt chars)", self.model, prompt.len());
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let response_json = read_json(response, self.timeout_secs).await?;
        Self::extract_content(&response_json)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Google Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            api_key,
            base_url,
            model,
            timeout_secs,
            client: http_client(timeout_secs)?,
        })
    }

    fn extract_content(response_json: &serde_json::Value) -> std::result::Result<String, LlmError> {
        let candidate = response_json
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or(LlmError::EmptyCompletion)?;

        if candidate.get("finishReason").and_then(|r| r.as_str()) == Some("SAFETY") {
            return Err(LlmError::ContentFiltered);
        }

        let text: String = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        debug!("Calling {} ({} prompt chars)", self.model, prompt.len());
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.1},
        });

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let response_json = read_json(response, self.timeout_secs).await?;
        Self::extract_content(&response_json)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_content_extraction() {
        let ok = json!({"choices": [{"message": {"content": "SELECT 1"}, "finish_reason": "stop"}]});
        assert_eq!(LlmClient::extract_content(&ok).unwrap(), "SELECT 1");

        let empty = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(matches!(LlmClient::extract_content(&empty), Err(LlmError::EmptyCompletion)));

        let no_choices = json!({"choices": []});
        assert!(matches!(LlmClient::extract_content(&no_choices), Err(LlmError::EmptyCompletion)));

        let filtered = json!({"choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]});
        assert!(matches!(LlmClient::extract_content(&filtered), Err(LlmError::ContentFiltered)));
    }

    #[test]
    fn test_gemini_content_extraction_joins_parts() {
        let ok = json!({"candidates": [{"content": {"parts": [{"text": "SELECT "}, {"text": "1"}]}}]});
        assert_eq!(GeminiClient::extract_content(&ok).unwrap(), "SELECT 1");

        let missing = json!({"candidates": []});
        assert!(matches!(GeminiClient::extract_content(&missing), Err(LlmError::EmptyCompletion)));
    }

    #[test]
    fn test_reasoning_models_get_completion_token_budget() {
        let client = LlmClient::new(
            "key".to_string(),
            "gpt-5-mini".to_string(),
            "http://localhost".to_string(),
            5,
        )
        .unwrap();
        let body = client.request_body("hi");
        assert_eq!(body["max_completion_tokens"], json!(4000));
        assert!(body.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_transport_error() {
        // Port 9 (discard) on localhost is not expected to speak HTTP
        let client = LlmClient::new(
            "key".to_string(),
            "gpt-4o-mini".to_string(),
            "http://127.0.0.1:9".to_string(),
            2,
        )
        .unwrap();
        let err = client.generate("hi").await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_) | LlmError::Timeout(_)));
    }
}
