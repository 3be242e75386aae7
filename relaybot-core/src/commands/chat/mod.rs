//! The `chat` command group and its conversation handlers.

pub mod gpt;
pub mod handler;
pub mod helpers;
pub mod message;

use crate::bot::Command;
use crate::bot::command::PERMISSION_VIEW_CHANNEL;
use crate::config::{BotConfig, DEFAULT_CHAT_MODEL};
use crate::conversation::{ConversationCache, IgnoredChannels, TokenBudget, Tokenizer};
use crate::llm::LlmClient;
use std::sync::Arc;

pub const COMMAND_NAME: &str = "chat";

/// Embed color of chat requests.
pub const INTERACTION_EMBED_COLOR: u32 = 0x000000;

/// Placeholder posted in a new thread while the answer is generated.
pub const PENDING_MESSAGE: &str = "⌛ Wait a moment, please...";

/// Minutes of inactivity before a conversation thread is archived.
pub const THREAD_AUTO_ARCHIVE_MINUTES: u32 = 60;

/// Longest accepted `context` option, bounded by the embed field limit.
pub const CONTEXT_MAX_LENGTH: usize = 1024;

/// Shared state of the chat handlers.
#[derive(Clone)]
pub struct ChatParams {
    pub llm: Arc<dyn LlmClient>,
    /// Models offered to users, default first.
    pub completion_models: Vec<String>,
    pub title_model: String,
    pub cache: Arc<ConversationCache>,
    pub budget: Arc<TokenBudget>,
    pub ignored: Arc<IgnoredChannels>,
    /// Messages fetched when rebuilding a conversation from its thread.
    pub history_limit: usize,
}

impl ChatParams {
    pub fn from_config(
        config: &BotConfig,
        llm: Arc<dyn LlmClient>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Self {
        let budget = TokenBudget::new(tokenizer).with_limits(
            config
                .tokens
                .limits
                .iter()
                .map(|(model, limit)| (model.clone(), *limit)),
        );
        Self {
            llm,
            completion_models: config.openai.completion_models.clone(),
            title_model: config.openai.title_model.clone(),
            cache: Arc::new(ConversationCache::new(config.cache.threads_capacity)),
            budget: Arc::new(budget),
            ignored: Arc::new(IgnoredChannels::new()),
            history_limit: config.cache.history_limit,
        }
    }

    /// The model used when an invocation does not pick one.
    pub fn default_model(&self) -> &str {
        self.completion_models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_CHAT_MODEL)
    }
}

/// Build the `chat` command group.
pub fn command(params: ChatParams) -> Command {
    Command::new(COMMAND_NAME, "Start conversation with LLM")
        .with_dm_permission(false)
        .with_default_member_permissions(PERMISSION_VIEW_CHANNEL)
        .with_sub_command(gpt::command(params))
}
