//! Configuration system for relaybot.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! explicit or working-directory config file -> environment -> CLI args.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when none is given.
pub const LOCAL_CONFIG_FILE: &str = "relaybot.toml";

/// Top-level configuration for the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub discord: DiscordConfig,
    pub openai: OpenAiConfig,
    pub cache: CacheConfig,
    pub tokens: TokenConfig,
}

/// Discord connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,
    /// Register commands in this guild only. Global when unset.
    pub guild: Option<String>,
    /// Delete the registered commands on shutdown.
    pub remove_commands: bool,
}

/// OpenAI-compatible API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API key. When empty, read from `api_key_env`.
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub base_url: String,
    /// Chat models offered by the `chat gpt` command, default first.
    pub completion_models: Vec<String>,
    /// Model used to title new conversation threads.
    pub title_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            completion_models: Vec::new(),
            title_model: "gpt-3.5-turbo-instruct".to_string(),
        }
    }
}

impl OpenAiConfig {
    /// The configured key, falling back to the `api_key_env` variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// In-memory cache sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Conversations kept before the oldest is evicted.
    pub threads_capacity: usize,
    /// Messages fetched when rebuilding an evicted conversation.
    pub history_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            threads_capacity: 64,
            history_limit: 100,
        }
    }
}

/// Token budget tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Truncate limits per model, added to or replacing the built-in ones.
    pub limits: HashMap<String, usize>,
}

/// Values set from the command line, applied last.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    pub discord: DiscordOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscordOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guild: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remove_commands: Option<bool>,
}

impl BotConfig {
    /// Check the settings the bot cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "discord.token".to_string(),
            });
        }
        if self.cache.threads_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "cache.threads_capacity must be at least 1".to_string(),
            });
        }
        if let Some((model, _)) = self.tokens.limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(ConfigError::Invalid {
                message: format!("tokens.limits.{model} must be at least 1"),
            });
        }
        Ok(())
    }
}

/// Chat model used when none is configured.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "relaybot", "relaybot")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration with layered sources.
///
/// Priority (highest first):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `RELAYBOT_`, `__` nests)
/// 3. `config_file`, or `relaybot.toml` in the working directory
/// 4. User config (`~/.config/relaybot/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<BotConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(BotConfig::default()));

    if let Some(user_config) = user_config_path().filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(&user_config));
    }

    match config_file {
        // An explicit file must exist.
        Some(path) => figment = figment.merge(Toml::file_exact(path)),
        None => {
            let local = Path::new(LOCAL_CONFIG_FILE);
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    // Environment variables (RELAYBOT_DISCORD__TOKEN, RELAYBOT_CACHE__THREADS_CAPACITY, etc.)
    figment = figment.merge(Env::prefixed("RELAYBOT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
