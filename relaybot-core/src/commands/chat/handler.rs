//! Structured `chat gpt` invocations: open a thread and answer the prompt.

use super::gpt::GptOption;
use super::helpers::{
    attach_usage_info, chat_request, content_or_url_data, generate_thread_title, split_message,
};
use super::{
    CONTEXT_MAX_LENGTH, ChatParams, INTERACTION_EMBED_COLOR, PENDING_MESSAGE,
    THREAD_AUTO_ARCHIVE_MINUTES,
};
use crate::bot::{CommandContext, CommandHandler};
use crate::conversation::Conversation;
use crate::platform::{
    ChannelMessage, ChatPlatform, Embed, EmbedAuthor, EmbedField, InteractionResponse,
    MessageEdit, Reply, ThreadStart, toggle_thread_lock,
};
use crate::types::Turn;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Name given to new conversation threads until a title is generated.
const NEW_THREAD_NAME: &str = "New chat";

/// Terminal handler of `chat gpt`.
pub struct GptHandler {
    params: ChatParams,
}

impl GptHandler {
    pub fn new(params: ChatParams) -> Self {
        Self { params }
    }

    /// Build the conversation and the request embed fields from the options.
    ///
    /// Sends the error follow-up itself and returns `None` when the options
    /// cannot be used.
    async fn prepare(&self, ctx: &CommandContext) -> Option<(Conversation, String, Vec<EmbedField>)> {
        let guild_id = ctx.guild_id();
        let interaction_id = &ctx.interaction().id;
        let options = ctx.options();

        let Some(prompt) = options.get_str(GptOption::Prompt.name()) else {
            error!(guild_id, %interaction_id, "Failed to parse prompt option");
            ctx.followup_error("❌ Error", "Failed to parse prompt option")
                .await;
            return None;
        };

        let mut fields = vec![EmbedField {
            name: String::new(),
            value: "\u{200B}".to_string(),
            inline: false,
        }];

        let model = match options.get_str(GptOption::Model.name()) {
            Some(model) => {
                debug!(guild_id, %interaction_id, model, "Model provided");
                model.to_string()
            }
            None => self.params.default_model().to_string(),
        };
        let mut conversation = Conversation::new(&model).with_turn(Turn::user(prompt));

        // A context file takes precedence over plain context.
        if let Some(attachment_id) = options.get_str(GptOption::ContextFile.name()) {
            let Some(attachment) = ctx.attachment(GptOption::ContextFile.name()) else {
                warn!(guild_id, %interaction_id, attachment_id, "Context file attachment not resolved");
                ctx.followup_error(
                    "Failed to get attachment data",
                    &format!("Attachment {attachment_id} was not found"),
                )
                .await;
                return None;
            };
            let context = match content_or_url_data(ctx.platform().as_ref(), &attachment.url).await {
                Ok(context) => context,
                Err(e) => {
                    error!(guild_id, %interaction_id, error = %e, "Failed to get context file data");
                    ctx.followup_error("Failed to get attachment data", &e.to_string())
                        .await;
                    return None;
                }
            };
            conversation.system = Some(Turn::system(context));

            let (within, count) = self.params.budget.is_within_limit(&mut conversation);
            if !within {
                let limit = self.params.budget.truncate_limit(&model).unwrap_or(count);
                warn!(guild_id, %interaction_id, count, limit, model = %model, "Context file exceeds token limit");
                ctx.followup_error(
                    "Failed to process context file",
                    &format!(
                        "Context file is `{count}` tokens, which exceeds allowed token limit of `{limit}` for model `{model}`.\nPlease provide a shorter file or use `context` option instead"
                    ),
                )
                .await;
                return None;
            }

            fields.push(EmbedField {
                name: GptOption::ContextFile.label().to_string(),
                value: attachment.url.clone(),
                inline: false,
            });
            info!(guild_id, %interaction_id, attachment_id, "Context file provided");
        } else if let Some(context) = options.get_str(GptOption::Context.name()) {
            if context.chars().count() >= CONTEXT_MAX_LENGTH {
                warn!(guild_id, %interaction_id, "Context is above the character limit");
                ctx.followup_error(
                    "Failed to process command",
                    &format!(
                        "Provided context is above the limit of {CONTEXT_MAX_LENGTH} characters. Please use `context-file` option instead"
                    ),
                )
                .await;
                return None;
            }
            conversation.system = Some(Turn::system(context));
            fields.push(EmbedField {
                name: GptOption::Context.label().to_string(),
                value: context.to_string(),
                inline: false,
            });
        }

        fields.push(EmbedField {
            name: GptOption::Model.label().to_string(),
            value: model.clone(),
            inline: false,
        });

        if let Some(temperature) = options.get_f64(GptOption::Temperature.name()) {
            let temperature = temperature as f32;
            conversation.temperature = Some(temperature);
            fields.push(EmbedField {
                name: GptOption::Temperature.label().to_string(),
                value: temperature.to_string(),
                inline: false,
            });
        }

        Some((conversation, prompt.to_string(), fields))
    }

    /// Post the answer into the pending message, then unlock the thread.
    async fn deliver(
        &self,
        ctx: &CommandContext,
        thread_id: &str,
        pending: ChannelMessage,
        conversation: Conversation,
    ) {
        let platform = ctx.platform();
        let guild_id = ctx.guild_id();
        let interaction_id = &ctx.interaction().id;

        let shared = self.params.cache.add(thread_id, conversation);
        let mut conversation = shared.lock().await;
        info!(
            guild_id,
            %interaction_id,
            model = %conversation.model,
            turns = conversation.turns.len(),
            "Chat request invoked"
        );
        let response = match self.params.llm.chat_completion(chat_request(&conversation)).await {
            Ok(response) => response,
            Err(e) => {
                error!(guild_id, %interaction_id, error = %e, "Chat completion failed");
                let edit = MessageEdit::error("❌ OpenAI API failed", e.to_string());
                if let Err(e) = platform
                    .edit_message(&pending.channel_id, &pending.id, edit)
                    .await
                {
                    error!(guild_id, %interaction_id, error = %e, "Failed to report chat failure");
                }
                return;
            }
        };
        conversation.push(Turn::assistant(&response.content));
        conversation.token_count = response.usage.total_tokens;
        let model = conversation.model.clone();
        let turns = conversation.turns.clone();
        drop(conversation);

        info!(
            guild_id,
            %interaction_id,
            model = %model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            total_tokens = response.usage.total_tokens,
            "Chat request completed"
        );

        tokio::spawn(generate_thread_title(
            platform.clone(),
            self.params.llm.clone(),
            self.params.title_model.clone(),
            thread_id.to_string(),
            turns,
        ));

        if let Some(last) = post_answer(platform.as_ref(), thread_id, &pending, &response.content).await {
            attach_usage_info(platform.as_ref(), &last, &response.usage, &model).await;
        }
        toggle_thread_lock(platform.as_ref(), thread_id, false).await;
    }
}

/// Replace the pending message with the answer, sending overflow as new
/// messages. Returns the last message of the answer.
async fn post_answer(
    platform: &dyn ChatPlatform,
    thread_id: &str,
    pending: &ChannelMessage,
    content: &str,
) -> Option<ChannelMessage> {
    let parts = split_message(content);
    let (first, rest) = parts.split_first()?;
    let mut last = match platform
        .edit_message(&pending.channel_id, &pending.id, MessageEdit::content(first))
        .await
    {
        Ok(message) => message,
        Err(e) => {
            error!(thread_id, error = %e, "Failed to post answer");
            let edit = MessageEdit::error("❌ Discord API Error", e.to_string());
            if let Err(e) = platform
                .edit_message(&pending.channel_id, &pending.id, edit)
                .await
            {
                error!(thread_id, error = %e, "Failed to report posting failure");
            }
            return None;
        }
    };
    for part in rest {
        match platform.send_message(thread_id, part, None).await {
            Ok(message) => last = message,
            Err(e) => error!(thread_id, error = %e, "Failed to post answer part"),
        }
    }
    Some(last)
}

#[async_trait]
impl CommandHandler for GptHandler {
    async fn handle(&self, ctx: &mut CommandContext) {
        let platform = ctx.platform().clone();
        let guild_id = ctx.guild_id().to_string();
        let guild_id = guild_id.as_str();
        let interaction_id = ctx.interaction().id.clone();
        let interaction_id = interaction_id.as_str();

        if let Ok(channel) = platform.channel(&ctx.interaction().channel_id).await {
            if channel.is_thread {
                info!(guild_id, interaction_id, "Interaction invoked in an existing thread, ignoring");
                return;
            }
        }

        info!(guild_id, interaction_id, user_id = %ctx.user().id, "Chat interaction invoked");

        if let Err(e) = ctx.respond(InteractionResponse::Deferred).await {
            error!(guild_id, interaction_id, error = %e, "Failed to respond to interaction");
            return;
        }

        let Some((conversation, prompt, fields)) = self.prepare(ctx).await else {
            return;
        };

        let user = ctx.user();
        let request_embed = Embed {
            description: Some(prompt),
            color: Some(INTERACTION_EMBED_COLOR),
            author: Some(EmbedAuthor {
                name: format!("OpenAI chat request by {}", user.username),
                icon_url: user.avatar_url.clone(),
            }),
            fields,
            ..Default::default()
        };
        if let Err(e) = ctx.followup(Reply::embed(request_embed)).await {
            error!(guild_id, interaction_id, error = %e, "Failed to post chat request");
            ctx.followup_error("Failed to process command", &e.to_string())
                .await;
            return;
        }

        // The thread is anchored on the request message.
        let anchor = match ctx.original_response().await {
            Ok(message) => message,
            Err(e) => {
                error!(guild_id, interaction_id, error = %e, "Failed to get interaction reference");
                ctx.followup_error("Failed to get interaction reference", &e.to_string())
                    .await;
                return;
            }
        };
        match platform.channel(&anchor.channel_id).await {
            Ok(channel) if !channel.is_thread => {}
            Ok(_) => {
                info!(guild_id, interaction_id, "Interaction reply was in a thread");
                return;
            }
            Err(e) => {
                error!(guild_id, interaction_id, error = %e, "Failed to look up reply channel");
                return;
            }
        }

        let thread = match platform
            .start_thread(
                &anchor.channel_id,
                &anchor.id,
                ThreadStart {
                    name: NEW_THREAD_NAME.to_string(),
                    auto_archive_minutes: THREAD_AUTO_ARCHIVE_MINUTES,
                    invitable: false,
                },
            )
            .await
        {
            Ok(thread) => thread,
            Err(e) => {
                error!(guild_id, interaction_id, error = %e, "Failed to create a thread");
                return;
            }
        };

        // Locked while the answer is generated.
        toggle_thread_lock(platform.as_ref(), &thread.id, true).await;
        if let Err(e) = platform.add_thread_member(&thread.id, &ctx.user().id).await {
            warn!(guild_id, interaction_id, thread_id = %thread.id, error = %e, "Failed to add user to thread");
        }

        let pending = match platform.send_message(&thread.id, PENDING_MESSAGE, None).await {
            Ok(message) => message,
            Err(e) => {
                error!(guild_id, interaction_id, thread_id = %thread.id, error = %e, "Failed to reply in the thread");
                return;
            }
        };

        self.deliver(ctx, &thread.id, pending, conversation).await;
        ctx.next().await;
    }
}
