//! The `gpt` sub-command: option schema and wiring.

use super::ChatParams;
use super::handler::GptHandler;
use super::message::GptMessageHandler;
use crate::bot::{Command, CommandOption, OptionChoice};

pub const COMMAND_NAME: &str = "gpt";

/// Options of the `gpt` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptOption {
    Prompt,
    Context,
    ContextFile,
    Model,
    Temperature,
}

impl GptOption {
    /// Option name as registered with the platform.
    pub fn name(&self) -> &'static str {
        match self {
            GptOption::Prompt => "prompt",
            GptOption::Context => "context",
            GptOption::ContextFile => "context-file",
            GptOption::Model => "model",
            GptOption::Temperature => "temperature",
        }
    }

    /// Field name used in the request embed.
    pub fn label(&self) -> &'static str {
        match self {
            GptOption::Prompt => "Prompt",
            GptOption::Context => "Context",
            GptOption::ContextFile => "Context file",
            GptOption::Model => "Model",
            GptOption::Temperature => "Temperature",
        }
    }
}

fn options(completion_models: &[String]) -> Vec<CommandOption> {
    let mut options = vec![
        CommandOption::string(GptOption::Prompt.name(), "ChatGPT prompt").required(),
        CommandOption::string(
            GptOption::Context.name(),
            "Sets context that guides the AI assistant's behavior during the conversation",
        ),
        CommandOption::attachment(
            GptOption::ContextFile.name(),
            "File that sets context that guides the AI assistant's behavior during the conversation",
        ),
    ];
    if completion_models.len() > 1 {
        let choices = completion_models
            .iter()
            .enumerate()
            .map(|(i, model)| {
                let name = if i == 0 {
                    format!("{model} (Default)")
                } else {
                    model.clone()
                };
                OptionChoice::new(name, model.as_str())
            })
            .collect();
        options.push(
            CommandOption::string(GptOption::Model.name(), "GPT model").with_choices(choices),
        );
    }
    options.push(
        CommandOption::number(
            GptOption::Temperature.name(),
            "What sampling temperature to use, between 0.0 and 2.0. Lower - more focused and deterministic",
        )
        .with_range(Some(0.0), Some(2.0)),
    );
    options
}

/// Build the `gpt` command.
pub fn command(params: ChatParams) -> Command {
    Command::new(COMMAND_NAME, "Start conversation with ChatGPT")
        .with_options(options(&params.completion_models))
        .with_handler(GptHandler::new(params.clone()))
        .with_message_handler(GptMessageHandler::new(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::OptionKind;

    fn names(options: &[CommandOption]) -> Vec<&str> {
        options.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn test_single_model_has_no_model_choice() {
        let options = options(&["gpt-4".to_string()]);
        assert_eq!(names(&options), vec!["prompt", "context", "context-file", "temperature"]);
        assert!(options[0].required);
        assert_eq!(options[2].kind, OptionKind::Attachment);
        assert_eq!(options[3].max_value, Some(2.0));
    }

    #[test]
    fn test_model_choices_mark_default() {
        let options = options(&["gpt-4".to_string(), "gpt-3.5-turbo".to_string()]);
        let model = options.iter().find(|o| o.name == "model").unwrap();
        assert_eq!(model.choices.len(), 2);
        assert_eq!(model.choices[0].name, "gpt-4 (Default)");
        assert_eq!(model.choices[0].value.as_str(), Some("gpt-4"));
        assert_eq!(model.choices[1].name, "gpt-3.5-turbo");
    }

    #[test]
    fn test_labels() {
        assert_eq!(GptOption::ContextFile.name(), "context-file");
        assert_eq!(GptOption::ContextFile.label(), "Context file");
    }
}
