//! OpenAI-compatible HTTP implementation of [`LlmClient`].
//!
//! Speaks the `/chat/completions`, `/completions`, `/moderations` and
//! `/images/generations` endpoints.

use async_trait::async_trait;
use relaybot_core::config::OpenAiConfig;
use relaybot_core::error::LlmError;
use relaybot_core::llm::{ChatCompletion, ChatRequest, CompletionRequest, ImageRequest, LlmClient};
use relaybot_core::types::TokenUsage;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

const PROVIDER: &str = "OpenAI";

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Create a client, resolving the API key from the config or environment.
    pub fn new(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let api_key = config.resolve_api_key().ok_or_else(|| LlmError::AuthFailed {
            provider: format!("{PROVIDER}: env var '{}' not set", config.api_key_env),
        })?;
        Ok(Self::new_with_key(config, api_key))
    }

    pub fn new_with_key(config: &OpenAiConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, LlmError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Sending OpenAI request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::ApiRequest {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(map_http_error(status, &response_body));
        }

        serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })
    }
}

fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 => {
            debug!(body = %body, "Authentication failed (401)");
            LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            }
        }
        429 => {
            // "Rate limit reached ... Please try again in 20s."
            let retry_secs = error_message(body)
                .and_then(|msg| {
                    msg.split("in ")
                        .last()
                        .map(|s| s.trim_end_matches('.').trim_end_matches('s').to_string())
                })
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(5);
            LlmError::RateLimited {
                retry_after_secs: retry_secs,
            }
        }
        status if status >= 500 => LlmError::ApiRequest {
            message: format!("Server error ({}): {}", status, body),
        },
        _ => LlmError::ApiRequest {
            message: format!(
                "HTTP {}: {}",
                status,
                error_message(body).unwrap_or_else(|| body.to_string())
            ),
        },
    }
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn parse_usage(body: &Value) -> TokenUsage {
    let field = |name: &str| {
        body.get("usage")
            .and_then(|u| u.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    };
    TokenUsage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    }
}

fn parse_chat_response(body: &Value) -> Result<ChatCompletion, LlmError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or(LlmError::EmptyResponse)?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No message content in choice".to_string(),
        })?;
    Ok(ChatCompletion {
        content: content.to_string(),
        usage: parse_usage(body),
    })
}

fn parse_completion_response(body: &Value) -> Result<String, LlmError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .ok_or(LlmError::EmptyResponse)?
        .get("text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No text in choice".to_string(),
        })
}

fn parse_moderation_response(body: &Value) -> Result<bool, LlmError> {
    body.get("results")
        .and_then(|r| r.get(0))
        .and_then(|r| r.get("flagged"))
        .and_then(Value::as_bool)
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No moderation result".to_string(),
        })
}

fn parse_image_response(body: &Value) -> Result<Vec<String>, LlmError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::ResponseParse {
            message: "No image data".to_string(),
        })?;
    Ok(data
        .iter()
        .filter_map(|d| d.get("url").and_then(Value::as_str).map(str::to_string))
        .collect())
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        let response = self.post("chat/completions", &body).await?;
        parse_chat_response(&response)
    }

    async fn completion(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let response = self.post("completions", &body).await?;
        parse_completion_response(&response)
    }

    async fn moderate(&self, input: &str) -> Result<bool, LlmError> {
        let response = self.post("moderations", &json!({ "input": input })).await?;
        parse_moderation_response(&response)
    }

    async fn create_images(&self, request: ImageRequest) -> Result<Vec<String>, LlmError> {
        let body = json!({
            "prompt": request.prompt,
            "n": request.n,
            "size": request.size,
            "response_format": "url",
            "user": request.user,
        });
        let response = self.post("images/generations", &body).await?;
        parse_image_response(&response)
    }
}
