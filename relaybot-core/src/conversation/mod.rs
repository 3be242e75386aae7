//! # Conversation State
//!
//! Per-thread conversation state shared by the chat handlers: the bounded
//! [`ConversationCache`], the [`TokenBudget`] that keeps conversations under
//! a model's context ceiling, and the [`IgnoredChannels`] set.

pub mod cache;
pub mod tokens;

pub use cache::{ConversationCache, SharedConversation};
pub use tokens::{TiktokenTokenizer, TokenBudget, TokenScheme, Tokenizer};

use crate::types::Turn;
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// State of one threaded conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Turns oldest first, without the system turn.
    pub turns: Vec<Turn>,
    pub system: Option<Turn>,
    pub model: String,
    pub temperature: Option<f32>,
    /// Token total as of the last recount or LLM usage report. Advisory only.
    pub token_count: usize,
}

impl Conversation {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            turns: Vec::new(),
            system: None,
            model: model.into(),
            temperature: None,
            token_count: 0,
        }
    }

    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.system = Some(Turn::system(content));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Turns as sent to the LLM: system turn first when present.
    pub fn request_messages(&self) -> Vec<Turn> {
        self.system
            .iter()
            .chain(self.turns.iter())
            .cloned()
            .collect()
    }
}

/// Channels where free-text auto replies are suppressed.
#[derive(Debug, Default)]
pub struct IgnoredChannels {
    channels: RwLock<HashSet<String>>,
}

impl IgnoredChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel_id)
    }

    /// Returns `true` if the channel was not ignored before.
    pub fn insert(&self, channel_id: &str) -> bool {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id.to_string())
    }

    /// Returns `true` if the channel was ignored before.
    pub fn remove(&self, channel_id: &str) -> bool {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel_id)
    }

    /// Flip the channel's state. Returns whether it is ignored afterwards.
    pub fn toggle(&self, channel_id: &str) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels.remove(channel_id) {
            false
        } else {
            channels.insert(channel_id.to_string());
            true
        }
    }

    pub fn len(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
