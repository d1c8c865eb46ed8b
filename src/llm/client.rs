//! Chat client for the judge model.
//!
//! Speaks the OpenAI `/v1/chat/completions` protocol (DeepSeek and most
//! hosted models accept it). Responses are always collected whole.

use super::JudgeProvider;
use crate::config::LlmConfig;
use crate::error::{Result, ScoringError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// A completed chat call.
#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    /// `"length"` means the answer hit `max_tokens` and is likely cut off.
    pub finish_reason: Option<String>,
}

/// Client for the judge endpoint.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client with the given configuration.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    fn request<'a>(&'a self, messages: Vec<Message>) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: false,
        }
    }

    /// Send a chat completion request and await the full response.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<LlmResponse> {
        let request = self.request(messages);
        let started = Instant::now();

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(ScoringError::Provider(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(ScoringError::Provider(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ScoringError::Provider(format!("Bad completion response: {}", e)))?;

        let (prompt_tokens, completion_tokens) = completion
            .usage
            .as_ref()
            .map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));
        debug!(
            model = %self.config.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens,
            completion_tokens,
            "Judge call finished"
        );

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ScoringError::Provider("No choices in response".to_string()))?;

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason,
        })
    }

    /// One user turn, optionally preceded by a system instruction.
    pub async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let messages: Vec<Message> = system
            .map(Message::system)
            .into_iter()
            .chain(std::iter::once(Message::user(user)))
            .collect();

        let response = self.chat(messages).await?;
        if response.finish_reason.as_deref() == Some("length") {
            warn!(
                max_tokens = self.config.max_tokens,
                "Judge answer truncated at max_tokens"
            );
        }
        Ok(response.content)
    }

    /// Round-trip a trivial prompt; any non-empty answer counts as success.
    pub async fn test_connection(&self) -> Result<()> {
        let answer = self
            .complete(None, "Reply with the single word: ready")
            .await?;
        if answer.trim().is_empty() {
            return Err(ScoringError::Provider(
                "Judge returned an empty answer".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl JudgeProvider for LlmClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        self.complete(Some(system), prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> LlmConfig {
        LlmConfig {
            api_base: base.to_string(),
            api_key: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_completion_with_missing_content() {
        let body = r#"{"choices":[{"message":{"content":null},"finish_reason":"length"}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content, None);
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn test_endpoint_construction() {
        let client = LlmClient::new(config("https://api.deepseek.com/")).unwrap();
        assert_eq!(client.endpoint(), "https://api.deepseek.com/v1/chat/completions");

        let client2 = LlmClient::new(config("https://api.deepseek.com")).unwrap();
        assert_eq!(client2.endpoint(), "https://api.deepseek.com/v1/chat/completions");
    }

    #[test]
    fn test_request_is_low_temperature_and_not_streamed() {
        let client = LlmClient::new(config("https://api.deepseek.com")).unwrap();
        let body = serde_json::to_value(client.request(vec![
            Message::system("sys"),
            Message::user("prompt"),
        ]))
        .unwrap();

        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["stream"], false);
        assert!((body["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "prompt");
    }
}
