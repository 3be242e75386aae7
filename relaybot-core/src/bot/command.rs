//! Command definitions.

use super::options::{CommandOption, OptionKind};
use super::registry::CommandRegistry;
use super::{CommandHandler, MessageHandler, UnhandledCommand};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Permission bit allowing members to view a channel.
pub const PERMISSION_VIEW_CHANNEL: u64 = 1 << 10;

/// Where a command shows up in the platform UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Slash command.
    #[default]
    ChatInput,
    User,
    Message,
}

/// A named command with its middlewares, handlers and sub-commands.
///
/// Commands are built once at startup and shared immutably afterwards.
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub dm_permission: bool,
    pub default_member_permissions: Option<u64>,
    pub kind: CommandKind,
    pub options: Vec<CommandOption>,
    pub middlewares: Vec<Arc<dyn CommandHandler>>,
    /// Terminal handler. Group commands keep the default, which only logs.
    pub handler: Arc<dyn CommandHandler>,
    pub message_handler: Option<Arc<dyn MessageHandler>>,
    pub sub_commands: CommandRegistry,
}

impl Command {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            dm_permission: false,
            default_member_permissions: None,
            kind: CommandKind::ChatInput,
            options: Vec::new(),
            middlewares: Vec::new(),
            handler: Arc::new(UnhandledCommand),
            message_handler: None,
            sub_commands: CommandRegistry::new(),
        }
    }

    pub fn with_dm_permission(mut self, allowed: bool) -> Self {
        self.dm_permission = allowed;
        self
    }

    pub fn with_default_member_permissions(mut self, permissions: u64) -> Self {
        self.default_member_permissions = Some(permissions);
        self
    }

    pub fn with_option(mut self, option: CommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_options(mut self, options: Vec<CommandOption>) -> Self {
        self.options.extend(options);
        self
    }

    pub fn with_middleware(mut self, middleware: impl CommandHandler + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn with_handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    pub fn with_message_handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_sub_command(mut self, command: Command) -> Self {
        self.sub_commands.register(command);
        self
    }

    /// Whether this command groups sub-commands of its own.
    pub fn is_group(&self) -> bool {
        self.sub_commands.count() > 0
    }

    /// Registration payload for the platform.
    pub fn definition(&self) -> CommandDefinition {
        let mut options = self.options.clone();
        options.extend(self.sub_commands.list().iter().map(|c| c.as_option()));
        CommandDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            dm_permission: self.dm_permission,
            default_member_permissions: self.default_member_permissions,
            kind: self.kind,
            options,
        }
    }

    /// This command rendered as an option of its parent.
    pub fn as_option(&self) -> CommandOption {
        let kind = if self.is_group() {
            OptionKind::SubCommandGroup
        } else {
            OptionKind::SubCommand
        };
        let definition = self.definition();
        CommandOption {
            options: definition.options,
            ..CommandOption::new(kind, definition.name, definition.description)
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("options", &self.options.len())
            .field("middlewares", &self.middlewares.len())
            .field("message_handler", &self.message_handler.is_some())
            .field("sub_commands", &self.sub_commands.count())
            .finish()
    }
}

/// Serialisable description of a command as registered with the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub dm_permission: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<u64>,
    pub kind: CommandKind,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chat_tree() -> Command {
        Command::new("chat", "Start conversation with LLM")
            .with_default_member_permissions(PERMISSION_VIEW_CHANNEL)
            .with_sub_command(
                Command::new("gpt", "Start conversation with ChatGPT")
                    .with_option(CommandOption::string("prompt", "ChatGPT prompt").required()),
            )
    }

    #[test]
    fn test_definition_renders_sub_commands_as_options() {
        let def = chat_tree().definition();
        assert_eq!(def.name, "chat");
        assert_eq!(def.default_member_permissions, Some(1024));
        assert_eq!(def.options.len(), 1);
        let gpt = &def.options[0];
        assert_eq!(gpt.kind, OptionKind::SubCommand);
        assert_eq!(gpt.name, "gpt");
        assert_eq!(gpt.options[0].name, "prompt");
        assert!(gpt.options[0].required);
    }

    #[test]
    fn test_nested_group_becomes_sub_command_group() {
        let root = Command::new("admin", "Admin tools").with_sub_command(
            Command::new("channels", "Channel tools")
                .with_sub_command(Command::new("ignore", "Toggle auto replies")),
        );
        let def = root.definition();
        let group = &def.options[0];
        assert_eq!(group.kind, OptionKind::SubCommandGroup);
        assert_eq!(group.options[0].kind, OptionKind::SubCommand);
        assert_eq!(group.options[0].name, "ignore");
    }

    #[test]
    fn test_own_options_precede_sub_commands() {
        let cmd = Command::new("mixed", "Mixed")
            .with_option(CommandOption::string("a", "A"))
            .with_sub_command(Command::new("b", "B"));
        let names: Vec<_> = cmd.definition().options.into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_plain_command_is_not_group() {
        let cmd = Command::new("info", "Info").with_dm_permission(true);
        assert!(!cmd.is_group());
        assert!(cmd.definition().dm_permission);
        assert!(format!("{cmd:?}").contains("info"));
    }
}
