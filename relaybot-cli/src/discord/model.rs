//! Discord wire types and their conversion to and from the core types.

use relaybot_core::bot::{
    CommandDefinition, CommandKind, CommandOption, InvocationOption, OptionKind, OptionValue,
};
use relaybot_core::platform::{
    Attachment, ChannelInfo, ChannelMessage, CommandData, Embed, Interaction, LinkButton,
    MessageKind, Reply, User,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

/// Interaction type of slash-command invocations.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

const CHANNEL_ANNOUNCEMENT_THREAD: u8 = 10;
const CHANNEL_PUBLIC_THREAD: u8 = 11;
const CHANNEL_PRIVATE_THREAD: u8 = 12;

const MESSAGE_DEFAULT: u8 = 0;
const MESSAGE_REPLY: u8 = 19;

const FLAG_EPHEMERAL: u64 = 1 << 6;

const COMPONENT_ACTION_ROW: u8 = 1;
const COMPONENT_BUTTON: u8 = 2;
const BUTTON_STYLE_LINK: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl From<DiscordUser> for User {
    fn from(user: DiscordUser) -> Self {
        let avatar_url = user
            .avatar
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{}.png", user.id, hash));
        User {
            id: user.id,
            username: user.username,
            avatar_url,
            bot: user.bot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMember {
    user: DiscordUser,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordOption {
    name: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    options: Vec<DiscordOption>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordAttachment {
    id: String,
    filename: String,
    url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DiscordResolved {
    #[serde(default)]
    attachments: HashMap<String, DiscordAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordCommandData {
    name: String,
    #[serde(default)]
    options: Vec<DiscordOption>,
    #[serde(default)]
    resolved: Option<DiscordResolved>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordInteraction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    member: Option<DiscordMember>,
    #[serde(default)]
    user: Option<DiscordUser>,
    #[serde(default)]
    data: Option<DiscordCommandData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    id: String,
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default)]
    embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordChannel {
    id: String,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyEvent {
    pub user: DiscordUser,
    pub application: ReadyApplication,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyApplication {
    pub id: String,
}

fn option_kind(kind: u8) -> Option<OptionKind> {
    Some(match kind {
        1 => OptionKind::SubCommand,
        2 => OptionKind::SubCommandGroup,
        3 => OptionKind::String,
        4 => OptionKind::Integer,
        5 => OptionKind::Boolean,
        10 => OptionKind::Number,
        11 => OptionKind::Attachment,
        _ => return None,
    })
}

fn option_type(kind: OptionKind) -> u8 {
    match kind {
        OptionKind::SubCommand => 1,
        OptionKind::SubCommandGroup => 2,
        OptionKind::String => 3,
        OptionKind::Integer => 4,
        OptionKind::Boolean => 5,
        OptionKind::Number => 10,
        OptionKind::Attachment => 11,
    }
}

fn option_value(kind: OptionKind, value: &Value) -> Option<OptionValue> {
    match kind {
        OptionKind::Integer => value.as_i64().map(OptionValue::Integer),
        OptionKind::Number => value.as_f64().map(OptionValue::Number),
        OptionKind::Boolean => value.as_bool().map(OptionValue::Boolean),
        _ => value.as_str().map(|s| OptionValue::String(s.to_string())),
    }
}

fn invocation_option(option: DiscordOption) -> Option<InvocationOption> {
    let kind = option_kind(option.kind)?;
    Some(InvocationOption {
        value: option.value.as_ref().and_then(|v| option_value(kind, v)),
        options: option.options.into_iter().filter_map(invocation_option).collect(),
        name: option.name,
        kind,
    })
}

impl DiscordInteraction {
    /// Convert an application-command interaction. Other kinds yield `None`.
    pub fn into_interaction(self) -> Option<Interaction> {
        if self.kind != INTERACTION_APPLICATION_COMMAND {
            return None;
        }
        let data = self.data?;
        let user = self.member.map(|m| m.user).or(self.user)?;
        let attachments = data
            .resolved
            .unwrap_or_default()
            .attachments
            .into_iter()
            .map(|(id, a)| {
                (
                    id,
                    Attachment {
                        id: a.id,
                        filename: a.filename,
                        url: a.url,
                    },
                )
            })
            .collect();
        Some(Interaction {
            id: self.id,
            token: self.token,
            guild_id: self.guild_id,
            channel_id: self.channel_id.unwrap_or_default(),
            user: user.into(),
            data: CommandData {
                name: data.name,
                options: data.options.into_iter().filter_map(invocation_option).collect(),
                attachments,
            },
        })
    }
}

impl From<DiscordMessage> for ChannelMessage {
    fn from(message: DiscordMessage) -> Self {
        let kind = match message.kind {
            MESSAGE_DEFAULT => MessageKind::Default,
            MESSAGE_REPLY => MessageKind::Reply,
            _ => MessageKind::Other,
        };
        ChannelMessage {
            id: message.id,
            channel_id: message.channel_id,
            guild_id: message.guild_id,
            author: message.author.into(),
            content: message.content,
            kind,
            embeds: message.embeds,
        }
    }
}

impl From<DiscordChannel> for ChannelInfo {
    fn from(channel: DiscordChannel) -> Self {
        let is_thread = matches!(
            channel.kind,
            CHANNEL_ANNOUNCEMENT_THREAD | CHANNEL_PUBLIC_THREAD | CHANNEL_PRIVATE_THREAD
        );
        ChannelInfo {
            id: channel.id,
            parent_id: channel.parent_id,
            owner_id: channel.owner_id,
            is_thread,
        }
    }
}

fn buttons_json(buttons: &[LinkButton]) -> Value {
    if buttons.is_empty() {
        return json!([]);
    }
    let buttons: Vec<Value> = buttons
        .iter()
        .map(|b| {
            json!({
                "type": COMPONENT_BUTTON,
                "style": BUTTON_STYLE_LINK,
                "label": b.label,
                "url": b.url,
            })
        })
        .collect();
    json!([{ "type": COMPONENT_ACTION_ROW, "components": buttons }])
}

/// Message payload of a reply or follow-up.
pub fn reply_json(reply: &Reply) -> Value {
    let mut body = json!({
        "embeds": reply.embeds,
        "components": buttons_json(&reply.buttons),
    });
    if let Some(content) = &reply.content {
        body["content"] = json!(content);
    }
    if reply.ephemeral {
        body["flags"] = json!(FLAG_EPHEMERAL);
    }
    body
}

fn command_option_json(option: &CommandOption) -> Value {
    let mut body = json!({
        "type": option_type(option.kind),
        "name": option.name,
        "description": option.description,
    });
    if option.required {
        body["required"] = json!(true);
    }
    if !option.choices.is_empty() {
        body["choices"] = json!(option.choices);
    }
    if let Some(min) = option.min_value {
        body["min_value"] = json!(min);
    }
    if let Some(max) = option.max_value {
        body["max_value"] = json!(max);
    }
    if !option.options.is_empty() {
        body["options"] = option.options.iter().map(command_option_json).collect();
    }
    body
}

/// Registration payload of a top-level command.
pub fn command_json(definition: &CommandDefinition) -> Value {
    let kind = match definition.kind {
        CommandKind::ChatInput => 1,
        CommandKind::User => 2,
        CommandKind::Message => 3,
    };
    let mut body = json!({
        "name": definition.name,
        "description": definition.description,
        "type": kind,
        "dm_permission": definition.dm_permission,
        "options": definition.options.iter().map(command_option_json).collect::<Vec<_>>(),
    });
    if let Some(permissions) = definition.default_member_permissions {
        // Permission bitsets travel as strings.
        body["default_member_permissions"] = json!(permissions.to_string());
    }
    body
}
