//! Built-in commands.
//!
//! - `chat gpt`: threaded conversations with a chat model
//! - `image dalle`: image generation behind a moderation gate
//! - `info`: version information

pub mod chat;
pub mod image;
pub mod info;

use crate::bot::Command;
use crate::config::BotConfig;
use crate::conversation::Tokenizer;
use crate::llm::LlmClient;
use std::sync::Arc;

/// The commands to register.
///
/// The LLM-backed groups are only offered when an LLM client is available.
pub fn builtin_commands(
    config: &BotConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tokenizer: Arc<dyn Tokenizer>,
) -> Vec<Command> {
    let mut commands = Vec::new();
    match llm {
        Some(llm) => {
            commands.push(chat::command(chat::ChatParams::from_config(
                config,
                llm.clone(),
                tokenizer,
            )));
            commands.push(image::command(llm));
        }
        None => tracing::warn!("No OpenAI API key configured, chat and image commands disabled"),
    }
    commands.push(info::command());
    commands
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::chat::ChatParams;
    use crate::config::BotConfig;
    use crate::conversation::Tokenizer;
    use crate::llm::MockLlmClient;
    use crate::platform::{Interaction, User};
    use std::sync::Arc;

    /// One token per whitespace-separated word.
    pub struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn count(&self, text: &str, _model: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    pub fn chat_params(llm: Arc<MockLlmClient>) -> ChatParams {
        ChatParams::from_config(&BotConfig::default(), llm, Arc::new(WordTokenizer))
    }

    pub fn interaction(channel_id: &str, user: User) -> Interaction {
        Interaction {
            id: "i-1".into(),
            token: "token".into(),
            guild_id: Some("guild-1".into()),
            channel_id: channel_id.into(),
            user,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use test_support::WordTokenizer;

    fn names(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_builtin_commands_with_llm() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let commands = builtin_commands(&BotConfig::default(), Some(llm), Arc::new(WordTokenizer));
        assert_eq!(names(&commands), vec!["chat", "image", "info"]);
        assert!(commands[0].sub_commands.get("gpt").is_some());
        assert!(commands[1].sub_commands.get("dalle").is_some());
    }

    #[test]
    fn test_builtin_commands_without_llm() {
        let commands = builtin_commands(&BotConfig::default(), None, Arc::new(WordTokenizer));
        assert_eq!(names(&commands), vec!["info"]);
    }
}
