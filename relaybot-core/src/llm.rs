//! LLM provider collaborator.
//!
//! Chat completion, plain completion (thread titles), moderation and image
//! generation. The binary implements [`LlmClient`] against an
//! OpenAI-compatible HTTP API; [`MockLlmClient`] serves tests.

use crate::error::LlmError;
use crate::types::{TokenUsage, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    /// Ordered conversation, system turn first when present.
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// The generated answer and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

/// A plain text completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// An image generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub n: u32,
    /// End-user id forwarded for abuse monitoring.
    pub user: String,
}

/// Everything the core needs from the LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError>;

    async fn completion(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Returns `true` when the input is flagged.
    async fn moderate(&self, input: &str) -> Result<bool, LlmError>;

    /// Returns one URL per generated image.
    async fn create_images(&self, request: ImageRequest) -> Result<Vec<String>, LlmError>;
}

/// A mock LLM client for testing and development.
///
/// Chat responses are served from a queue, falling back to a fixed answer
/// when it runs dry. Operations can be made to fail by name
/// (`"chat"`, `"completion"`, `"moderate"`, `"images"`).
pub struct MockLlmClient {
    responses: Mutex<VecDeque<ChatCompletion>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    completion_requests: Mutex<Vec<CompletionRequest>>,
    image_requests: Mutex<Vec<ImageRequest>>,
    moderated: Mutex<Vec<String>>,
    title: String,
    flagged: bool,
    failing: Mutex<HashSet<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            chat_requests: Mutex::new(Vec::new()),
            completion_requests: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
            moderated: Mutex::new(Vec::new()),
            title: "Mock title".to_string(),
            flagged: false,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Create a mock whose chat completions always answer `text`.
    pub fn with_response(text: &str) -> Self {
        let client = Self::new();
        client.queue_response(Self::text_response(text));
        client
    }

    /// Moderation flags every input.
    pub fn flagging(mut self) -> Self {
        self.flagged = true;
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Queue a response to be returned by the next `chat_completion` call.
    pub fn queue_response(&self, response: ChatCompletion) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> ChatCompletion {
        ChatCompletion {
            content: text.to_string(),
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            },
        }
    }

    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().unwrap().clone()
    }

    pub fn completion_requests(&self) -> Vec<CompletionRequest> {
        self.completion_requests.lock().unwrap().clone()
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.image_requests.lock().unwrap().clone()
    }

    pub fn moderated(&self) -> Vec<String> {
        self.moderated.lock().unwrap().clone()
    }

    fn check(&self, operation: &str) -> Result<(), LlmError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(LlmError::ApiRequest {
                message: format!("mock failure in {operation}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.chat_requests.lock().unwrap().push(request);
        self.check("chat")?;
        let mut responses = self.responses.lock().unwrap();
        // Keep serving the last queued answer once the queue is down to one.
        let response = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        Ok(response.unwrap_or_else(|| Self::text_response("Mock response")))
    }

    async fn completion(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.completion_requests.lock().unwrap().push(request);
        self.check("completion")?;
        Ok(self.title.clone())
    }

    async fn moderate(&self, input: &str) -> Result<bool, LlmError> {
        self.moderated.lock().unwrap().push(input.to_string());
        self.check("moderate")?;
        Ok(self.flagged)
    }

    async fn create_images(&self, request: ImageRequest) -> Result<Vec<String>, LlmError> {
        let n = request.n;
        self.image_requests.lock().unwrap().push(request);
        self.check("images")?;
        Ok((1..=n)
            .map(|i| format!("https://images.example.com/{i}.png"))
            .collect())
    }
}
