//! The `info` command.

use crate::VERSION;
use crate::bot::command::PERMISSION_VIEW_CHANNEL;
use crate::bot::{Command, CommandContext, CommandHandler};
use crate::platform::{Embed, InteractionResponse, LinkButton, Reply};
use async_trait::async_trait;

pub const COMMAND_NAME: &str = "info";

const INFO_EMBED_COLOR: u32 = 0x00bfff;

const SOURCE_URL: &str = env!("CARGO_PKG_REPOSITORY");

struct InfoHandler;

#[async_trait]
impl CommandHandler for InfoHandler {
    async fn handle(&self, ctx: &mut CommandContext) {
        let reply = Reply {
            embeds: vec![Embed {
                title: Some("Bot Version".to_string()),
                description: Some(format!("Version: {VERSION}")),
                color: Some(INFO_EMBED_COLOR),
                ..Default::default()
            }],
            buttons: vec![LinkButton {
                label: "Source code".to_string(),
                url: SOURCE_URL.to_string(),
            }],
            ephemeral: true,
            ..Default::default()
        };
        if let Err(e) = ctx.respond(InteractionResponse::Message(reply)).await {
            tracing::error!(
                guild_id = %ctx.guild_id(),
                interaction_id = %ctx.interaction().id,
                error = %e,
                "Failed to respond to info command"
            );
        }
    }
}

pub fn command() -> Command {
    Command::new(COMMAND_NAME, "Show information about current version of Open AI bot")
        .with_dm_permission(true)
        .with_default_member_permissions(PERMISSION_VIEW_CHANNEL)
        .with_handler(InfoHandler)
}
