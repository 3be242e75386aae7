//! Chat platform collaborator.
//!
//! The core never speaks a wire protocol itself. Everything it needs from the
//! chat platform (acknowledging invocations, posting and editing messages,
//! thread primitives, command registration) goes through [`ChatPlatform`].
//! The binary provides a Discord implementation; tests use [`MockPlatform`].

use crate::bot::CommandDefinition;
use crate::bot::options::InvocationOption;
use crate::error::PlatformError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result alias for platform calls.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// A platform user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            avatar_url: None,
            bot: false,
        }
    }
}

/// A file attached to an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
}

/// The command part of a structured invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandData {
    pub name: String,
    pub options: Vec<InvocationOption>,
    /// Attachments referenced by attachment options, keyed by attachment id.
    pub attachments: HashMap<String, Attachment>,
}

/// A structured command invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub token: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub user: User,
    pub data: CommandData,
}

/// Message types the core distinguishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Default,
    Reply,
    Other,
}

/// A message posted in a channel or thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author: User,
    pub content: String,
    pub kind: MessageKind,
    pub embeds: Vec<Embed>,
}

/// Channel metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelInfo {
    pub id: String,
    pub parent_id: Option<String>,
    pub owner_id: Option<String>,
    pub is_thread: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Rich message content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

/// Color of every error embed.
pub const ERROR_COLOR: u32 = 0xff0000;

impl Embed {
    /// A red embed describing a failure.
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            description: Some(description.into()),
            color: Some(ERROR_COLOR),
            ..Default::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline: false,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }
}

/// A button that opens a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// Content of an interaction response or follow-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub buttons: Vec<LinkButton>,
    /// Only visible to the invoking user.
    pub ephemeral: bool,
}

impl Reply {
    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Default::default()
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::embed(Embed::error(title, description))
    }
}

/// Initial acknowledgement of a structured invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionResponse {
    /// "Thinking..." placeholder, the real answer follows later.
    Deferred,
    Message(Reply),
}

/// Partial update of an existing message. `None` leaves a part untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageEdit {
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
}

impl MessageEdit {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embeds: None,
        }
    }

    pub fn embeds(embeds: Vec<Embed>) -> Self {
        Self {
            content: None,
            embeds: Some(embeds),
        }
    }

    /// Replace the whole message with a single error embed.
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            content: Some(String::new()),
            embeds: Some(vec![Embed::error(title, description)]),
        }
    }
}

/// Parameters for starting a thread on a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadStart {
    pub name: String,
    pub auto_archive_minutes: u32,
    pub invitable: bool,
}

/// A command registration returned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredCommand {
    pub id: String,
    pub name: String,
}

/// Everything the core needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Id of the bot's own user, known once the platform session is ready.
    fn current_user_id(&self) -> Option<String>;

    async fn respond(
        &self,
        interaction: &Interaction,
        response: InteractionResponse,
    ) -> PlatformResult<()>;

    async fn followup(&self, interaction: &Interaction, reply: Reply)
    -> PlatformResult<ChannelMessage>;

    /// The message that carries the interaction's original response.
    async fn original_response(&self, interaction: &Interaction) -> PlatformResult<ChannelMessage>;

    async fn channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo>;

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage>;

    async fn send_embeds(
        &self,
        channel_id: &str,
        embeds: Vec<Embed>,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> PlatformResult<ChannelMessage>;

    async fn message(&self, channel_id: &str, message_id: &str) -> PlatformResult<ChannelMessage>;

    /// Recent messages of a channel, newest first.
    async fn messages(&self, channel_id: &str, limit: usize) -> PlatformResult<Vec<ChannelMessage>>;

    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        thread: ThreadStart,
    ) -> PlatformResult<ChannelInfo>;

    async fn set_thread_locked(&self, thread_id: &str, locked: bool) -> PlatformResult<()>;

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> PlatformResult<()>;

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()>;

    async fn trigger_typing(&self, channel_id: &str) -> PlatformResult<()>;

    /// Download an attachment's text content.
    async fn fetch_attachment(&self, url: &str) -> PlatformResult<String>;

    /// Replace every registered command with `definitions`.
    async fn overwrite_commands(
        &self,
        guild_id: Option<&str>,
        definitions: &[CommandDefinition],
    ) -> PlatformResult<Vec<RegisteredCommand>>;

    async fn delete_command(&self, guild_id: Option<&str>, command_id: &str) -> PlatformResult<()>;
}

/// Lock or unlock a thread, logging instead of failing.
pub async fn toggle_thread_lock(platform: &dyn ChatPlatform, thread_id: &str, locked: bool) {
    if let Err(e) = platform.set_thread_locked(thread_id, locked).await {
        tracing::warn!(thread_id, locked, error = %e, "Failed to lock/unlock thread");
    }
}

/// A call observed by [`MockPlatform`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Respond {
        interaction_id: String,
        response: InteractionResponse,
    },
    Followup {
        interaction_id: String,
        reply: Reply,
    },
    SendMessage {
        channel_id: String,
        content: String,
        reply_to: Option<String>,
    },
    SendEmbeds {
        channel_id: String,
        embeds: Vec<Embed>,
        reply_to: Option<String>,
    },
    EditMessage {
        channel_id: String,
        message_id: String,
        edit: MessageEdit,
    },
    StartThread {
        channel_id: String,
        message_id: String,
        thread: ThreadStart,
    },
    SetThreadLocked {
        thread_id: String,
        locked: bool,
    },
    AddThreadMember {
        thread_id: String,
        user_id: String,
    },
    RenameChannel {
        channel_id: String,
        name: String,
    },
    TriggerTyping {
        channel_id: String,
    },
    OverwriteCommands {
        guild_id: Option<String>,
        names: Vec<String>,
    },
    DeleteCommand {
        guild_id: Option<String>,
        command_id: String,
    },
}

/// In-memory platform for tests and development.
///
/// Records every mutating call, keeps sent messages so they can be edited
/// and fetched back, and can be told to fail specific operations by name
/// (`"respond"`, `"followup"`, `"send_message"`, ...).
pub struct MockPlatform {
    user_id: String,
    calls: Mutex<Vec<PlatformCall>>,
    channels: Mutex<HashMap<String, ChannelInfo>>,
    messages: Mutex<HashMap<String, ChannelMessage>>,
    history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    attachments: Mutex<HashMap<String, String>>,
    originals: Mutex<HashMap<String, ChannelMessage>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            user_id: "bot-user".to_string(),
            calls: Mutex::new(Vec::new()),
            channels: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            attachments: Mutex::new(HashMap::new()),
            originals: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The bot user id reported by [`ChatPlatform::current_user_id`].
    pub fn bot_user(&self) -> User {
        User {
            id: self.user_id.clone(),
            username: "relaybot".to_string(),
            avatar_url: None,
            bot: true,
        }
    }

    pub fn add_channel(&self, channel: ChannelInfo) {
        self.channels
            .lock()
            .unwrap()
            .insert(channel.id.clone(), channel);
    }

    pub fn add_message(&self, message: ChannelMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    /// Set the history returned by `messages`, newest first.
    pub fn set_history(&self, channel_id: &str, messages: Vec<ChannelMessage>) {
        self.history
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), messages);
    }

    pub fn add_attachment(&self, url: &str, content: &str) {
        self.attachments
            .lock()
            .unwrap()
            .insert(url.to_string(), content.to_string());
    }

    /// Make the named operation return an error from now on.
    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Current state of a message, after any edits.
    pub fn stored_message(&self, message_id: &str) -> Option<ChannelMessage> {
        self.messages.lock().unwrap().get(message_id).cloned()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, operation: &str) -> PlatformResult<()> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(PlatformError::Api {
                status: 500,
                message: format!("mock failure in {operation}"),
            });
        }
        Ok(())
    }

    fn new_message(
        &self,
        channel_id: &str,
        content: &str,
        embeds: Vec<Embed>,
        kind: MessageKind,
    ) -> ChannelMessage {
        let id = format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let message = ChannelMessage {
            id,
            channel_id: channel_id.to_string(),
            guild_id: None,
            author: self.bot_user(),
            content: content.to_string(),
            kind,
            embeds,
        };
        self.add_message(message.clone());
        message
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    fn current_user_id(&self) -> Option<String> {
        Some(self.user_id.clone())
    }

    async fn respond(
        &self,
        interaction: &Interaction,
        response: InteractionResponse,
    ) -> PlatformResult<()> {
        self.record(PlatformCall::Respond {
            interaction_id: interaction.id.clone(),
            response,
        });
        self.check("respond")
    }

    async fn followup(
        &self,
        interaction: &Interaction,
        reply: Reply,
    ) -> PlatformResult<ChannelMessage> {
        self.record(PlatformCall::Followup {
            interaction_id: interaction.id.clone(),
            reply: reply.clone(),
        });
        self.check("followup")?;
        let message = self.new_message(
            &interaction.channel_id,
            reply.content.as_deref().unwrap_or_default(),
            reply.embeds,
            MessageKind::Other,
        );
        // The first follow-up after a deferred ack becomes the original response.
        self.originals
            .lock()
            .unwrap()
            .entry(interaction.id.clone())
            .or_insert_with(|| message.clone());
        Ok(message)
    }

    async fn original_response(&self, interaction: &Interaction) -> PlatformResult<ChannelMessage> {
        self.check("original_response")?;
        self.originals
            .lock()
            .unwrap()
            .get(&interaction.id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("original response of {}", interaction.id),
            })
    }

    async fn channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo> {
        self.check("channel")?;
        self.channels
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("channel {channel_id}"),
            })
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage> {
        self.record(PlatformCall::SendMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        self.check("send_message")?;
        let kind = if reply_to.is_some() {
            MessageKind::Reply
        } else {
            MessageKind::Default
        };
        Ok(self.new_message(channel_id, content, Vec::new(), kind))
    }

    async fn send_embeds(
        &self,
        channel_id: &str,
        embeds: Vec<Embed>,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage> {
        self.record(PlatformCall::SendEmbeds {
            channel_id: channel_id.to_string(),
            embeds: embeds.clone(),
            reply_to: reply_to.map(str::to_string),
        });
        self.check("send_embeds")?;
        Ok(self.new_message(channel_id, "", embeds, MessageKind::Reply))
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> PlatformResult<ChannelMessage> {
        self.record(PlatformCall::EditMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            edit: edit.clone(),
        });
        self.check("edit_message")?;
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("message {message_id}"),
            })?;
        if let Some(content) = edit.content {
            message.content = content;
        }
        if let Some(embeds) = edit.embeds {
            message.embeds = embeds;
        }
        Ok(message.clone())
    }

    async fn message(&self, _channel_id: &str, message_id: &str) -> PlatformResult<ChannelMessage> {
        self.check("message")?;
        self.stored_message(message_id)
            .ok_or_else(|| PlatformError::NotFound {
                resource: format!("message {message_id}"),
            })
    }

    async fn messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> PlatformResult<Vec<ChannelMessage>> {
        self.check("messages")?;
        Ok(self
            .history
            .lock()
            .unwrap()
            .get(channel_id)
            .map(|h| h.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        thread: ThreadStart,
    ) -> PlatformResult<ChannelInfo> {
        self.record(PlatformCall::StartThread {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            thread,
        });
        self.check("start_thread")?;
        // Threads started on a message share the message's id.
        let info = ChannelInfo {
            id: message_id.to_string(),
            parent_id: Some(channel_id.to_string()),
            owner_id: Some(self.user_id.clone()),
            is_thread: true,
        };
        self.add_channel(info.clone());
        Ok(info)
    }

    async fn set_thread_locked(&self, thread_id: &str, locked: bool) -> PlatformResult<()> {
        self.record(PlatformCall::SetThreadLocked {
            thread_id: thread_id.to_string(),
            locked,
        });
        self.check("set_thread_locked")
    }

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> PlatformResult<()> {
        self.record(PlatformCall::AddThreadMember {
            thread_id: thread_id.to_string(),
            user_id: user_id.to_string(),
        });
        self.check("add_thread_member")
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()> {
        self.record(PlatformCall::RenameChannel {
            channel_id: channel_id.to_string(),
            name: name.to_string(),
        });
        self.check("rename_channel")
    }

    async fn trigger_typing(&self, channel_id: &str) -> PlatformResult<()> {
        self.record(PlatformCall::TriggerTyping {
            channel_id: channel_id.to_string(),
        });
        self.check("trigger_typing")
    }

    async fn fetch_attachment(&self, url: &str) -> PlatformResult<String> {
        self.check("fetch_attachment")?;
        self.attachments
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                resource: url.to_string(),
            })
    }

    async fn overwrite_commands(
        &self,
        guild_id: Option<&str>,
        definitions: &[CommandDefinition],
    ) -> PlatformResult<Vec<RegisteredCommand>> {
        self.record(PlatformCall::OverwriteCommands {
            guild_id: guild_id.map(str::to_string),
            names: definitions.iter().map(|d| d.name.clone()).collect(),
        });
        self.check("overwrite_commands")?;
        Ok(definitions
            .iter()
            .map(|d| RegisteredCommand {
                id: format!("cmd-{}", d.name),
                name: d.name.clone(),
            })
            .collect())
    }

    async fn delete_command(&self, guild_id: Option<&str>, command_id: &str) -> PlatformResult<()> {
        self.record(PlatformCall::DeleteCommand {
            guild_id: guild_id.map(str::to_string),
            command_id: command_id.to_string(),
        });
        self.check("delete_command")
    }
}
