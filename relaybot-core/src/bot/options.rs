//! Option schema for commands, and the option trees carried by invocations.
//!
//! A [`CommandOption`] declares what a command accepts; an
//! [`InvocationOption`] is what the platform delivers when a user runs it.
//! Sub-command selection travels in the same tree: the first option of an
//! invocation may be a `SubCommand` or `SubCommandGroup` node whose own
//! options hold the next level.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Type tag shared by declared options and invocation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    SubCommand,
    SubCommandGroup,
    String,
    Integer,
    Boolean,
    Number,
    Attachment,
}

impl OptionKind {
    /// Whether this kind selects a child command rather than carrying a value.
    pub fn is_sub_command(&self) -> bool {
        matches!(self, OptionKind::SubCommand | OptionKind::SubCommandGroup)
    }
}

/// A typed option payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numbers and integers both read as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Number(n) => Some(*n),
            OptionValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::String(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Integer(value)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        OptionValue::Number(value)
    }
}

/// One predefined value a user may pick for an option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub name: String,
    pub value: OptionValue,
}

impl OptionChoice {
    pub fn new(name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Declared parameter of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOption {
    pub kind: OptionKind,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<OptionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Nested options, used by sub-command and group definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<CommandOption>,
}

impl CommandOption {
    pub fn new(kind: OptionKind, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            description: description.into(),
            required: false,
            choices: Vec::new(),
            min_value: None,
            max_value: None,
            options: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OptionKind::String, name, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OptionKind::Integer, name, description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OptionKind::Number, name, description)
    }

    pub fn attachment(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(OptionKind::Attachment, name, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_choices(mut self, choices: Vec<OptionChoice>) -> Self {
        self.choices = choices;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }
}

/// A node of the option tree delivered with a structured invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOption {
    pub name: String,
    pub kind: OptionKind,
    pub value: Option<OptionValue>,
    pub options: Vec<InvocationOption>,
}

impl InvocationOption {
    pub fn value(name: impl Into<String>, kind: OptionKind, value: impl Into<OptionValue>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: Some(value.into()),
            options: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::value(name, OptionKind::String, OptionValue::String(value.into()))
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::value(name, OptionKind::Integer, value)
    }

    pub fn number(name: impl Into<String>, value: f64) -> Self {
        Self::value(name, OptionKind::Number, value)
    }

    /// Attachment options carry the attachment id; the URL is resolved
    /// through the invocation's attachment table.
    pub fn attachment(name: impl Into<String>, attachment_id: impl Into<String>) -> Self {
        Self::value(
            name,
            OptionKind::Attachment,
            OptionValue::String(attachment_id.into()),
        )
    }

    pub fn sub_command(name: impl Into<String>, options: Vec<InvocationOption>) -> Self {
        Self {
            name: name.into(),
            kind: OptionKind::SubCommand,
            value: None,
            options,
        }
    }

    pub fn sub_command_group(name: impl Into<String>, options: Vec<InvocationOption>) -> Self {
        Self {
            name: name.into(),
            kind: OptionKind::SubCommandGroup,
            value: None,
            options,
        }
    }
}

/// Option name → option lookup for one resolved nesting level.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    options: HashMap<String, InvocationOption>,
}

impl OptionMap {
    pub fn from_options(options: &[InvocationOption]) -> Self {
        Self {
            options: options
                .iter()
                .map(|o| (o.name.clone(), o.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&InvocationOption> {
        self.options.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.value.as_ref()?.as_str()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.value.as_ref()?.as_i64()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.value.as_ref()?.as_f64()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_map_typed_accessors() {
        let map = OptionMap::from_options(&[
            InvocationOption::string("prompt", "draw a cat"),
            InvocationOption::integer("number", 3),
            InvocationOption::number("temperature", 0.5),
        ]);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get_str("prompt"), Some("draw a cat"));
        assert_eq!(map.get_i64("number"), Some(3));
        assert_eq!(map.get_f64("temperature"), Some(0.5));
        assert_eq!(map.get_f64("number"), Some(3.0));
        assert_eq!(map.get_str("number"), None);
        assert!(map.get("missing").is_none());
    }

    #[test]
    fn test_sub_command_kinds() {
        assert!(OptionKind::SubCommand.is_sub_command());
        assert!(OptionKind::SubCommandGroup.is_sub_command());
        assert!(!OptionKind::Attachment.is_sub_command());
        let node = InvocationOption::sub_command("gpt", vec![InvocationOption::string("prompt", "hi")]);
        assert!(node.value.is_none());
        assert_eq!(node.options.len(), 1);
    }

    #[test]
    fn test_command_option_builder_serializes_compactly() {
        let opt = CommandOption::integer("number", "How many")
            .with_range(Some(1.0), Some(4.0))
            .required();
        let json = serde_json::to_value(&opt).unwrap();
        assert_eq!(json["kind"], "integer");
        assert_eq!(json["required"], true);
        assert_eq!(json["max_value"], 4.0);
        assert!(json.get("choices").is_none());
        assert!(json.get("options").is_none());
    }

    #[test]
    fn test_option_choice_values() {
        let choice = OptionChoice::new("256x256 (Default)", "256x256");
        assert_eq!(choice.value.as_str(), Some("256x256"));
        assert_eq!(OptionValue::Boolean(true).as_bool(), Some(true));
    }
}
