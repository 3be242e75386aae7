//! Per-invocation execution contexts.
//!
//! A context owns the handler chain built for one invocation and a cursor
//! into it. [`CommandContext::next`] runs the handler under the cursor with
//! the same context, so a handler may do work before and after handing off.

use super::command::Command;
use super::options::{InvocationOption, OptionMap};
use super::{CommandHandler, MessageHandler};
use crate::platform::{
    Attachment, ChannelMessage, ChatPlatform, Embed, Interaction, InteractionResponse,
    PlatformResult, Reply, User,
};
use std::sync::Arc;

/// Context of a structured invocation.
pub struct CommandContext {
    platform: Arc<dyn ChatPlatform>,
    command: Arc<Command>,
    interaction: Interaction,
    options: OptionMap,
    handlers: Vec<Arc<dyn CommandHandler>>,
    cursor: usize,
}

impl CommandContext {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        command: Arc<Command>,
        interaction: Interaction,
        options: &[InvocationOption],
        handlers: Vec<Arc<dyn CommandHandler>>,
    ) -> Self {
        Self {
            platform,
            command,
            interaction,
            options: OptionMap::from_options(options),
            handlers,
            cursor: 0,
        }
    }

    /// Run the next handler of the chain. No-op once the chain is drained.
    pub async fn next(&mut self) {
        let Some(handler) = self.handlers.get(self.cursor).cloned() else {
            return;
        };
        self.cursor += 1;
        handler.handle(self).await;
    }

    /// Handlers not yet run.
    pub fn remaining(&self) -> usize {
        self.handlers.len() - self.cursor
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    /// The resolved command.
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    pub fn user(&self) -> &User {
        &self.interaction.user
    }

    pub fn guild_id(&self) -> &str {
        self.interaction.guild_id.as_deref().unwrap_or_default()
    }

    /// Options of the resolved nesting level.
    pub fn options(&self) -> &OptionMap {
        &self.options
    }

    /// Resolve an attachment option's value to the attachment itself.
    pub fn attachment(&self, option: &str) -> Option<&Attachment> {
        let id = self.options.get_str(option)?;
        self.interaction.data.attachments.get(id)
    }

    pub async fn respond(&self, response: InteractionResponse) -> PlatformResult<()> {
        self.platform.respond(&self.interaction, response).await
    }

    pub async fn followup(&self, reply: Reply) -> PlatformResult<ChannelMessage> {
        self.platform.followup(&self.interaction, reply).await
    }

    /// Send an error follow-up, logging if even that fails.
    pub async fn followup_error(&self, title: &str, description: &str) {
        if let Err(e) = self.followup(Reply::error(title, description)).await {
            tracing::error!(
                guild_id = %self.guild_id(),
                interaction_id = %self.interaction.id,
                error = %e,
                "Failed to send error follow-up"
            );
        }
    }

    pub async fn original_response(&self) -> PlatformResult<ChannelMessage> {
        self.platform.original_response(&self.interaction).await
    }
}

/// Context of a free-text message.
pub struct MessageContext {
    platform: Arc<dyn ChatPlatform>,
    command: Arc<Command>,
    message: ChannelMessage,
    handlers: Vec<Arc<dyn MessageHandler>>,
    cursor: usize,
}

impl MessageContext {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        command: Arc<Command>,
        message: ChannelMessage,
        handlers: Vec<Arc<dyn MessageHandler>>,
    ) -> Self {
        Self {
            platform,
            command,
            message,
            handlers,
            cursor: 0,
        }
    }

    /// Run the next handler of the chain. No-op once the chain is drained.
    pub async fn next(&mut self) {
        let Some(handler) = self.handlers.get(self.cursor).cloned() else {
            return;
        };
        self.cursor += 1;
        handler.handle(self).await;
    }

    pub fn remaining(&self) -> usize {
        self.handlers.len() - self.cursor
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    /// The top-level command whose tree contributed the chain.
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn message(&self) -> &ChannelMessage {
        &self.message
    }

    /// Reply to the message in its channel.
    pub async fn reply(&self, content: &str) -> PlatformResult<ChannelMessage> {
        self.platform
            .send_message(&self.message.channel_id, content, Some(&self.message.id))
            .await
    }

    pub async fn embed_reply(&self, embed: Embed) -> PlatformResult<ChannelMessage> {
        self.platform
            .send_embeds(&self.message.channel_id, vec![embed], Some(&self.message.id))
            .await
    }

    pub async fn typing(&self) -> PlatformResult<()> {
        self.platform.trigger_typing(&self.message.channel_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Step {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        forward: bool,
    }

    #[async_trait]
    impl CommandHandler for Step {
        async fn handle(&self, ctx: &mut CommandContext) {
            self.log.lock().unwrap().push(format!("{}:before", self.name));
            if self.forward {
                ctx.next().await;
            }
            self.log.lock().unwrap().push(format!("{}:after", self.name));
        }
    }

    fn context(handlers: Vec<Arc<dyn CommandHandler>>) -> CommandContext {
        CommandContext::new(
            Arc::new(MockPlatform::new()),
            Arc::new(Command::new("test", "")),
            Interaction::default(),
            &[InvocationOption::string("prompt", "hello")],
            handlers,
        )
    }

    fn step(name: &'static str, log: &Arc<Mutex<Vec<String>>>, forward: bool) -> Arc<dyn CommandHandler> {
        Arc::new(Step {
            name,
            log: log.clone(),
            forward,
        })
    }

    #[tokio::test]
    async fn test_next_runs_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context(vec![step("outer", &log, true), step("inner", &log, true)]);
        ctx.next().await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
        assert_eq!(ctx.remaining(), 0);
    }

    #[tokio::test]
    async fn test_handler_not_forwarding_stops_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = context(vec![step("gate", &log, false), step("never", &log, true)]);
        ctx.next().await;
        assert_eq!(*log.lock().unwrap(), vec!["gate:before", "gate:after"]);
        assert_eq!(ctx.remaining(), 1);
    }

    #[tokio::test]
    async fn test_next_on_drained_context_is_noop() {
        let mut ctx = context(Vec::new());
        for _ in 0..5 {
            ctx.next().await;
        }
        assert_eq!(ctx.remaining(), 0);
        assert_eq!(ctx.options().get_str("prompt"), Some("hello"));
    }
}
