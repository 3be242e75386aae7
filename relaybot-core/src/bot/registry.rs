//! Named command registry.

use super::command::Command;
use std::collections::HashMap;
use std::sync::Arc;

/// Commands keyed by name, remembering insertion order for enumeration.
///
/// Registering a name twice keeps the first command.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<Command>>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_commands(commands: impl IntoIterator<Item = Command>) -> Self {
        let mut registry = Self::new();
        for command in commands {
            registry.register(command);
        }
        registry
    }

    /// Insert `command` unless its name is taken. Returns whether it was added.
    pub fn register(&mut self, command: impl Into<Arc<Command>>) -> bool {
        let command = command.into();
        if self.index.contains_key(&command.name) {
            tracing::debug!(command = %command.name, "Command already registered, keeping the first");
            return false;
        }
        self.index.insert(command.name.clone(), self.commands.len());
        self.commands.push(command);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Command>> {
        self.index.get(name).map(|&i| &self.commands[i])
    }

    /// All commands in registration order.
    pub fn list(&self) -> &[Arc<Command>] {
        &self.commands
    }

    pub fn count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
