//! The `image` command group.

pub mod dalle;

use crate::bot::Command;
use crate::bot::command::PERMISSION_VIEW_CHANNEL;
use crate::llm::LlmClient;
use std::sync::Arc;

pub const COMMAND_NAME: &str = "image";

pub fn command(llm: Arc<dyn LlmClient>) -> Command {
    Command::new(COMMAND_NAME, "Generate creative images from textual descriptions")
        .with_dm_permission(false)
        .with_default_member_permissions(PERMISSION_VIEW_CHANNEL)
        .with_sub_command(dalle::command(llm))
}
