//! Helpers shared by the chat handlers.

use super::gpt::GptOption;
use crate::conversation::Conversation;
use crate::llm::{ChatRequest, CompletionRequest, LlmClient};
use crate::platform::{ChannelMessage, ChatPlatform, Embed, MessageEdit, MessageKind};
use crate::types::{TokenUsage, Turn};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest message the platform accepts, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Longest thread name the platform accepts.
const MAX_THREAD_NAME_LENGTH: usize = 100;

const TITLE_INSTRUCTION: &str = "Generate a short and concise title summarizing the conversation \
in the same language. The title must not contain any quotes. The title should be no longer than \
60 characters:";

/// Only ordinary messages and replies take part in conversations.
pub fn should_handle_message_kind(kind: MessageKind) -> bool {
    matches!(kind, MessageKind::Default | MessageKind::Reply)
}

/// Split `message` into parts the platform accepts, breaking on whitespace.
///
/// Short messages come back untouched. Longer ones are re-flowed word by
/// word, so runs of whitespace collapse to single spaces; a single word
/// longer than the limit is cut into chunks. Text with no words at all
/// yields one empty part.
pub fn split_message(message: &str) -> Vec<String> {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in message.split_whitespace().flat_map(chunk_word) {
        let word_len = word.chars().count();
        if current_len > 0 && current_len + word_len + 1 > MAX_MESSAGE_LENGTH {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }
    parts
}

/// Cut a word into pieces of at most `MAX_MESSAGE_LENGTH - 1` characters.
fn chunk_word(word: &str) -> Vec<&str> {
    let limit = MAX_MESSAGE_LENGTH - 1;
    let mut chunks = Vec::new();
    let mut rest = word;
    while rest.chars().count() > limit {
        let split = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }
    chunks.push(rest);
    chunks
}

/// Whether `s` is an absolute URL with a host.
pub fn is_url(s: &str) -> bool {
    url::Url::parse(s).map(|u| u.has_host()).unwrap_or(false)
}

/// Resolve a context value: URLs are downloaded, anything else is used as is.
pub async fn content_or_url_data(platform: &dyn ChatPlatform, value: &str) -> crate::platform::PlatformResult<String> {
    if is_url(value) {
        platform.fetch_attachment(value).await
    } else {
        Ok(value.to_string())
    }
}

/// Conversation settings recovered from the embed of an interaction reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionReply {
    pub prompt: Option<String>,
    /// Plain context or the URL of a context file.
    pub context: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// Read back the request embed posted by the `chat gpt` command.
///
/// A context file field takes precedence over a plain context field.
pub fn parse_interaction_reply(message: &ChannelMessage) -> InteractionReply {
    let mut reply = InteractionReply::default();
    let mut file_context = None;
    for embed in &message.embeds {
        if let Some(description) = embed.description.as_ref().filter(|d| !d.is_empty()) {
            reply.prompt = Some(description.clone());
        }
        for field in &embed.fields {
            match field.name.as_str() {
                name if name == GptOption::Prompt.label() => reply.prompt = Some(field.value.clone()),
                name if name == GptOption::Context.label() => {
                    reply.context.get_or_insert_with(|| field.value.clone());
                }
                name if name == GptOption::ContextFile.label() => {
                    file_context = Some(field.value.clone())
                }
                name if name == GptOption::Model.label() => reply.model = Some(field.value.clone()),
                name if name == GptOption::Temperature.label() => match field.value.parse::<f32>() {
                    Ok(t) => reply.temperature = Some(t),
                    Err(e) => warn!(
                        channel_id = %message.channel_id,
                        message_id = %message.id,
                        error = %e,
                        "Failed to parse temperature value"
                    ),
                },
                _ => {}
            }
        }
    }
    if file_context.is_some() {
        reply.context = file_context;
    }
    reply
}

/// Build the LLM request for a conversation.
pub fn chat_request(conversation: &Conversation) -> ChatRequest {
    ChatRequest {
        model: conversation.model.clone(),
        messages: conversation.request_messages(),
        temperature: conversation.temperature,
    }
}

/// Price per (prompt, completion) token for models with published pricing.
fn token_prices(model: &str) -> Option<(f64, f64)> {
    match model {
        "gpt-3.5-turbo" | "gpt-3.5-turbo-0301" | "gpt-3.5-turbo-0613" => Some((0.0000015, 0.000002)),
        "gpt-3.5-turbo-16k" | "gpt-3.5-turbo-16k-0613" => Some((0.000003, 0.000004)),
        "gpt-4" | "gpt-4-0314" | "gpt-4-0613" => Some((0.00003, 0.00006)),
        "gpt-4-32k" | "gpt-4-32k-0314" | "gpt-4-32k-0613" => Some((0.00006, 0.00012)),
        _ => None,
    }
}

/// Estimated cost in dollars, `None` for models without known prices.
pub fn estimate_cost(usage: &TokenUsage, model: &str) -> Option<f64> {
    let (prompt, completion) = token_prices(model)?;
    Some(usage.prompt_tokens as f64 * prompt + usage.completion_tokens as f64 * completion)
}

/// Footer text summarising token usage and cost.
pub fn usage_footer(usage: &TokenUsage, model: &str) -> String {
    let mut text = format!(
        "Completion Tokens: {}, Total: {}",
        usage.completion_tokens, usage.total_tokens
    );
    if let Some(cost) = estimate_cost(usage, model) {
        text.push_str(&format!("\nLLM Cost: ${cost:.6}"));
    }
    text
}

/// Add the usage footer to the last message of an answer.
pub async fn attach_usage_info(
    platform: &dyn ChatPlatform,
    message: &ChannelMessage,
    usage: &TokenUsage,
    model: &str,
) {
    let edit = MessageEdit::embeds(vec![Embed::default().footer(usage_footer(usage, model))]);
    if let Err(e) = platform
        .edit_message(&message.channel_id, &message.id, edit)
        .await
    {
        warn!(
            channel_id = %message.channel_id,
            message_id = %message.id,
            error = %e,
            "Failed to attach usage info"
        );
    }
}

/// Prompt asking the completion model for a thread title.
pub fn title_prompt(turns: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in turns {
        prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
    }
    prompt.push('\n');
    prompt.push_str(TITLE_INSTRUCTION);
    prompt
}

/// Clean up a generated title for use as a thread name.
fn sanitize_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .chars()
        .take(MAX_THREAD_NAME_LENGTH)
        .collect()
}

/// Ask the LLM for a title and rename the thread. Failures are only logged.
pub async fn generate_thread_title(
    platform: Arc<dyn ChatPlatform>,
    llm: Arc<dyn LlmClient>,
    model: String,
    thread_id: String,
    turns: Vec<Turn>,
) {
    let request = CompletionRequest {
        model,
        prompt: title_prompt(&turns),
        temperature: 0.5,
        max_tokens: 75,
    };
    let title = match llm.completion(request).await {
        Ok(text) => sanitize_title(&text),
        Err(e) => {
            warn!(thread_id = %thread_id, error = %e, "Failed to generate thread title");
            return;
        }
    };
    if title.is_empty() {
        debug!(thread_id = %thread_id, "Generated thread title was empty");
        return;
    }
    if let Err(e) = platform.rename_channel(&thread_id, &title).await {
        warn!(thread_id = %thread_id, error = %e, "Failed to update thread title");
    }
}
