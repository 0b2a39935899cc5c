//! The LLM boundary: a narrow [`LlmClient`] trait and an OpenAI chat
//! completions implementation.

use anyhow::Context;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5-2025-08-07";

/// A fully rendered request for one agent run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentPrompt {
    pub system: String,
    pub user: String,
    /// Name and JSON schema the model's reply must conform to.
    pub schema_name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM response could not be decoded: {0}")]
    InvalidResponse(String),

    #[error("LLM response contained no message content")]
    EmptyResponse,
}

impl LlmError {
    /// Whether a fresh attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::EmptyResponse => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::InvalidResponse(_) => false,
        }
    }
}

/// Sends a prompt to a language model and returns the raw reply text.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn run_agent(&self, prompt: &AgentPrompt) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'a str,
    json_schema: JsonSchema<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchema<'a> {
    name: &'a str,
    schema: &'a serde_json::Value,
    strict: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// OpenAI chat completions client using strict structured output.
#[derive(Clone)]
pub struct OpenAIClient {
    client: ClientWithMiddleware,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(
        client: ClientWithMiddleware,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, prompt: &'a AgentPrompt) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchema {
                    name: &prompt.schema_name,
                    schema: &prompt.schema,
                    strict: true,
                },
            },
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAIClient {
    async fn run_agent(&self, prompt: &AgentPrompt) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, schema = %prompt.schema_name, "Calling chat completions");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)?;

        if let Some(refusal) = message.refusal {
            return Err(LlmError::InvalidResponse(format!(
                "model refused: {}",
                refusal
            )));
        }

        match message.content {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(LlmError::EmptyResponse),
        }
    }
}

/// Build the plain reqwest client that outbound middleware stacks wrap.
pub fn build_http_client(user_agent: &str) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .build()
        .context("Failed to create HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> AgentPrompt {
        AgentPrompt {
            system: "sys".to_string(),
            user: "usr".to_string(),
            schema_name: "TaskpilotDesign".to_string(),
            schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_request_uses_strict_json_schema() {
        let client = OpenAIClient::new(
            reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build(),
            "key".to_string(),
            None,
            Some("http://localhost:9999/v1/".to_string()),
        );
        let prompt = prompt();
        let body = serde_json::to_value(client.build_request(&prompt)).unwrap();

        assert_eq!(body["model"], DEFAULT_OPENAI_MODEL);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            "TaskpilotDesign"
        );
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
        assert_eq!(client.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::Api {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!LlmError::Api {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!LlmError::InvalidResponse("bad".into()).is_retryable());
    }
}
