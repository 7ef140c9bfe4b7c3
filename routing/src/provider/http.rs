//! OpenAI-compatible chat-completions backend.
//!
//! Works against any server exposing `POST {base_url}/chat/completions` and
//! `GET {base_url}/models` (llama.cpp server, vLLM, hosted APIs, proxies).

use super::Provider;
use crate::error::ProviderError;
use crate::task::{Task, TaskOutput};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Base URL including the API version, e.g. `http://localhost:8080/v1`.
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Used when the task carries no timeout of its own.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// When set, reported token usage is priced at this rate.
    #[serde(default)]
    pub cost_per_token: Option<f64>,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout_secs() -> u64 {
    300
}

impl HttpProviderConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            cost_per_token: None,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub struct HttpProvider {
    config: HttpProviderConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Failed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &HttpProviderConfig {
        &self.config
    }
}

/// Map a non-success HTTP status to a provider error class.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("HTTP {}: {}", status.as_u16(), body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::PAYLOAD_TOO_LARGE => {
            ProviderError::Validation(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout(detail),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => ProviderError::Network(detail),
        _ => ProviderError::Failed(detail),
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ProviderError::Network(err.to_string())
    } else {
        ProviderError::Failed(err.to_string())
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn run(&self, task: &Task) -> Result<TaskOutput, ProviderError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &task.content,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = self
            .http
            .post(self.config.endpoint("chat/completions"))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(timeout) = task.constraints.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failed(format!("malformed response: {e}")))?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Failed("response had no choices".to_string()))?;

        let mut output = TaskOutput::new(choice.message.content.unwrap_or_default());
        if let (Some(rate), Some(usage)) = (self.config.cost_per_token, chat.usage) {
            output = output.with_cost(usage.total_tokens as f64 * rate);
        }
        Ok(output)
    }

    async fn health_check(&self) -> bool {
        let mut builder = self
            .http
            .get(self.config.endpoint("models"))
            .timeout(Duration::from_secs(5));
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
