//! # Relaybot Core
//!
//! Core library for relaybot, a chat-platform bot that relays prompts to an
//! LLM and answers inside threaded conversations.
//! Provides the command registry and dispatch router, the per-invocation
//! handler chains, the conversation cache, token budgeting, the built-in
//! commands and the collaborator traits the binary implements.

pub mod bot;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod platform;
pub mod types;

// Re-export commonly used types at the crate root.
pub use bot::{
    Command, CommandContext, CommandHandler, CommandRegistry, MessageContext, MessageHandler,
    Router,
};
pub use config::{BotConfig, load_config};
pub use conversation::{Conversation, ConversationCache, IgnoredChannels, TokenBudget};
pub use error::{ConfigError, LlmError, PlatformError};
pub use llm::{LlmClient, MockLlmClient};
pub use platform::{ChatPlatform, MockPlatform};
pub use types::{Role, TokenUsage, Turn};

/// Version reported by the `info` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
