//! Dispatch router.
//!
//! Resolves structured invocations through the command tree into a handler
//! chain, fans free-text messages out to every command tree offering a
//! message handler, and keeps the platform's command registrations in sync.

use super::command::Command;
use super::context::{CommandContext, MessageContext};
use super::options::{InvocationOption, OptionKind};
use super::registry::CommandRegistry;
use super::{CommandHandler, MessageHandler};
use crate::error::PlatformError;
use crate::platform::{ChannelMessage, ChatPlatform, CommandData, Interaction, RegisteredCommand};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of resolving a structured invocation.
pub struct Resolution {
    /// The command whose terminal handler ends the chain.
    pub command: Arc<Command>,
    /// Options of the resolved nesting level.
    pub options: Vec<InvocationOption>,
    /// Middlewares outer to inner, then exactly one terminal handler.
    pub handlers: Vec<Arc<dyn CommandHandler>>,
}

/// Walk `option` down from `command`, accumulating middlewares.
///
/// Never fails: when a named child is missing the walk stops at the nearest
/// resolved ancestor and that command's terminal handler ends the chain.
fn resolve_option(
    command: &Arc<Command>,
    level_options: &[InvocationOption],
    option: &InvocationOption,
    mut chain: Vec<Arc<dyn CommandHandler>>,
) -> Resolution {
    let fallback = |mut chain: Vec<Arc<dyn CommandHandler>>| {
        chain.push(command.handler.clone());
        Resolution {
            command: command.clone(),
            options: level_options.to_vec(),
            handlers: chain,
        }
    };

    if !option.kind.is_sub_command() {
        return fallback(chain);
    }
    let Some(child) = command.sub_commands.get(&option.name) else {
        debug!(
            command = %command.name,
            sub_command = %option.name,
            "Sub-command not registered, falling back to parent handler"
        );
        return fallback(chain);
    };

    chain.extend(child.middlewares.iter().cloned());
    match (option.kind, option.options.first()) {
        (OptionKind::SubCommandGroup, Some(next)) => {
            resolve_option(child, &option.options, next, chain)
        }
        _ => {
            chain.push(child.handler.clone());
            Resolution {
                command: child.clone(),
                options: option.options.clone(),
                handlers: chain,
            }
        }
    }
}

/// Routes invocations to commands.
pub struct Router {
    commands: CommandRegistry,
    registered: Mutex<Vec<RegisteredCommand>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Router {
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands: CommandRegistry::from_commands(commands),
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Add a top-level command. A name that is already taken is ignored.
    pub fn register(&mut self, command: Command) {
        self.commands.register(command);
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Work out which command runs for `data` and the chain that leads to it.
    ///
    /// `None` means the top-level name is not ours.
    pub fn resolve(&self, data: &CommandData) -> Option<Resolution> {
        let command = self.commands.get(&data.name)?;
        match data.options.first() {
            Some(first) => Some(resolve_option(
                command,
                &data.options,
                first,
                command.middlewares.clone(),
            )),
            None => {
                let mut handlers = command.middlewares.clone();
                handlers.push(command.handler.clone());
                Some(Resolution {
                    command: command.clone(),
                    options: Vec::new(),
                    handlers,
                })
            }
        }
    }

    /// Run the handler chain for a structured invocation.
    ///
    /// Returns `false` when the invocation names no registered command.
    pub async fn dispatch_interaction(
        &self,
        platform: Arc<dyn ChatPlatform>,
        interaction: Interaction,
    ) -> bool {
        let Some(resolution) = self.resolve(&interaction.data) else {
            debug!(
                command = %interaction.data.name,
                interaction_id = %interaction.id,
                "Ignoring invocation of unknown command"
            );
            return false;
        };
        debug!(
            command = %resolution.command.name,
            interaction_id = %interaction.id,
            handlers = resolution.handlers.len(),
            "Dispatching interaction"
        );
        let mut ctx = CommandContext::new(
            platform,
            resolution.command,
            interaction,
            &resolution.options,
            resolution.handlers,
        );
        ctx.next().await;
        true
    }

    /// Offer a free-text message to every command tree with message handlers.
    ///
    /// Returns the number of chains run.
    pub async fn dispatch_message(
        &self,
        platform: Arc<dyn ChatPlatform>,
        message: ChannelMessage,
    ) -> usize {
        let mut dispatched = 0;
        for command in self.commands.list() {
            let handlers = message_handlers(command);
            if handlers.is_empty() {
                continue;
            }
            let mut ctx =
                MessageContext::new(platform.clone(), command.clone(), message.clone(), handlers);
            ctx.next().await;
            dispatched += 1;
        }
        dispatched
    }

    /// Overwrite the platform's registrations with every top-level command.
    pub async fn sync(
        &self,
        platform: &dyn ChatPlatform,
        guild_id: Option<&str>,
    ) -> Result<(), PlatformError> {
        let definitions: Vec<_> = self.commands.list().iter().map(|c| c.definition()).collect();
        let registered = platform.overwrite_commands(guild_id, &definitions).await?;
        info!(
            guild_id = guild_id.unwrap_or_default(),
            count = registered.len(),
            "Synced commands"
        );
        *self.registered.lock().unwrap_or_else(PoisonError::into_inner) = registered;
        Ok(())
    }

    /// Delete every registration made by [`Router::sync`].
    ///
    /// Keeps going past failures and returns them all.
    pub async fn clear_commands(
        &self,
        platform: &dyn ChatPlatform,
        guild_id: Option<&str>,
    ) -> Vec<PlatformError> {
        let registered = std::mem::take(
            &mut *self.registered.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let mut errors = Vec::new();
        for command in registered {
            if let Err(e) = platform.delete_command(guild_id, &command.id).await {
                warn!(command = %command.name, error = %e, "Cannot delete command");
                errors.push(e);
            }
        }
        errors
    }

    /// Registrations remembered from the last sync.
    pub fn registered(&self) -> Vec<RegisteredCommand> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Message handlers of `command` and its descendants, pre-order.
fn message_handlers(command: &Command) -> Vec<Arc<dyn MessageHandler>> {
    let mut handlers: Vec<Arc<dyn MessageHandler>> = command.message_handler.iter().cloned().collect();
    for child in command.sub_commands.list() {
        handlers.extend(message_handlers(child));
    }
    handlers
}
