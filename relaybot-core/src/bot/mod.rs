//! # Command System
//!
//! Declarative command tree plus the router that dispatches structured
//! invocations and free-text messages through per-invocation handler chains.
//!
//! A handler chain is a list of middlewares followed by exactly one terminal
//! handler. Handlers continue the chain cooperatively by calling
//! `ctx.next().await`; a handler that returns without doing so ends it.

pub mod command;
pub mod context;
pub mod options;
pub mod registry;
pub mod router;

pub use command::{Command, CommandDefinition, CommandKind};
pub use context::{CommandContext, MessageContext};
pub use options::{
    CommandOption, InvocationOption, OptionChoice, OptionKind, OptionMap, OptionValue,
};
pub use registry::CommandRegistry;
pub use router::{Resolution, Router};

use async_trait::async_trait;

/// A step of a structured invocation's handler chain.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &mut CommandContext);
}

/// A step of a free-text message's handler chain.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &mut MessageContext);
}

/// Terminal handler of commands that only group sub-commands.
pub(crate) struct UnhandledCommand;

#[async_trait]
impl CommandHandler for UnhandledCommand {
    async fn handle(&self, ctx: &mut CommandContext) {
        tracing::debug!(
            command = %ctx.command().name,
            interaction_id = %ctx.interaction().id,
            "Command has no handler of its own"
        );
    }
}
