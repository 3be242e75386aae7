//! Free-text messages posted inside conversation threads.

use super::helpers::{
    attach_usage_info, chat_request, content_or_url_data, parse_interaction_reply,
    should_handle_message_kind, split_message,
};
use super::{ChatParams, PENDING_MESSAGE};
use crate::bot::{MessageContext, MessageHandler};
use crate::conversation::{Conversation, SharedConversation};
use crate::platform::{ChannelInfo, ChannelMessage, Embed, toggle_thread_lock};
use crate::types::Turn;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Continues a `chat gpt` conversation from messages in its thread.
pub struct GptMessageHandler {
    params: ChatParams,
}

impl GptMessageHandler {
    pub fn new(params: ChatParams) -> Self {
        Self { params }
    }

    /// The thread the message belongs to, when it is one of ours.
    async fn conversation_thread(&self, ctx: &MessageContext) -> Option<ChannelInfo> {
        let message = ctx.message();
        if !should_handle_message_kind(message.kind) {
            return None;
        }
        let bot_id = ctx.platform().current_user_id()?;
        if message.author.bot || message.author.id == bot_id {
            return None;
        }
        let channel = match ctx.platform().channel(&message.channel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(channel_id = %message.channel_id, error = %e, "Failed to look up message channel");
                return None;
            }
        };
        if !channel.is_thread || channel.owner_id.as_deref() != Some(bot_id.as_str()) {
            return None;
        }
        if self.params.ignored.contains(&channel.id) {
            debug!(channel_id = %channel.id, "Channel is ignored");
            return None;
        }
        Some(channel)
    }

    /// Find the thread's conversation, rebuilding it from the thread when it
    /// is no longer cached. The new message is appended either way.
    async fn conversation(
        &self,
        ctx: &MessageContext,
        thread: &ChannelInfo,
    ) -> Option<SharedConversation> {
        let message = ctx.message();
        if let Some(shared) = self.params.cache.get(&thread.id) {
            shared.lock().await.push(Turn::user(&message.content));
            return Some(shared);
        }

        let conversation = self.rebuild(ctx, thread).await?;
        info!(
            thread_id = %thread.id,
            turns = conversation.turns.len(),
            "Rebuilt conversation from thread history"
        );
        // Another message may have rebuilt the thread meanwhile; keep its entry.
        let (shared, inserted) = self.params.cache.get_or_add(&thread.id, conversation);
        if !inserted {
            debug!(thread_id = %thread.id, "Conversation cached while rebuilding");
            shared.lock().await.push(Turn::user(&message.content));
        }
        Some(shared)
    }

    async fn rebuild(&self, ctx: &MessageContext, thread: &ChannelInfo) -> Option<Conversation> {
        let platform = ctx.platform();
        let message = ctx.message();
        let parent_id = thread.parent_id.as_deref()?;

        // Threads are started on the request message and share its id.
        let starter = match platform.message(parent_id, &thread.id).await {
            Ok(starter) => starter,
            Err(e) => {
                warn!(thread_id = %thread.id, error = %e, "Failed to fetch thread starter message");
                return None;
            }
        };
        let reply = parse_interaction_reply(&starter);
        let Some(model) = reply.model else {
            debug!(thread_id = %thread.id, "Thread starter is not a chat request");
            return None;
        };

        let mut conversation = Conversation::new(model);
        conversation.temperature = reply.temperature;
        if let Some(context) = reply.context {
            match content_or_url_data(platform.as_ref(), &context).await {
                Ok(context) => conversation.system = Some(Turn::system(context)),
                Err(e) => {
                    error!(thread_id = %thread.id, error = %e, "Failed to get context data");
                    report(ctx, Embed::error("Failed to get attachment data", e.to_string())).await;
                    return None;
                }
            }
        }
        if let Some(prompt) = reply.prompt {
            conversation.push(Turn::user(prompt));
        }

        let history = match platform.messages(&thread.id, self.params.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                error!(thread_id = %thread.id, error = %e, "Failed to fetch thread history");
                return None;
            }
        };
        let bot_id = platform.current_user_id().unwrap_or_default();
        for past in history.iter().rev() {
            if past.id == message.id || past.content.is_empty() || past.content == PENDING_MESSAGE {
                continue;
            }
            let turn = if past.author.id == bot_id {
                Turn::assistant(&past.content)
            } else {
                Turn::user(&past.content)
            };
            conversation.push(turn);
        }
        conversation.push(Turn::user(&message.content));
        Some(conversation)
    }

    async fn answer(&self, ctx: &MessageContext, thread: &ChannelInfo, shared: SharedConversation) {
        let platform = ctx.platform();
        let mut conversation = shared.lock().await;

        let (within, count) = self.params.budget.is_within_limit(&mut conversation);
        if !within {
            info!(thread_id = %thread.id, count, model = %conversation.model, "Conversation over token limit, truncating");
            self.params.budget.adjust(&mut conversation);
        }

        if let Err(e) = ctx.typing().await {
            debug!(thread_id = %thread.id, error = %e, "Failed to trigger typing");
        }
        toggle_thread_lock(platform.as_ref(), &thread.id, true).await;

        let response = match self.params.llm.chat_completion(chat_request(&conversation)).await {
            Ok(response) => response,
            Err(e) => {
                error!(thread_id = %thread.id, error = %e, "Chat completion failed");
                report(ctx, Embed::error("❌ OpenAI API failed", e.to_string())).await;
                toggle_thread_lock(platform.as_ref(), &thread.id, false).await;
                return;
            }
        };
        conversation.push(Turn::assistant(&response.content));
        conversation.token_count = response.usage.total_tokens;
        let model = conversation.model.clone();
        drop(conversation);

        let mut last: Option<ChannelMessage> = None;
        for part in split_message(&response.content) {
            match ctx.reply(&part).await {
                Ok(sent) => last = Some(sent),
                Err(e) => {
                    error!(thread_id = %thread.id, error = %e, "Failed to post answer");
                    report(ctx, Embed::error("❌ Discord API Error", e.to_string())).await;
                    break;
                }
            }
        }
        if let Some(last) = last {
            attach_usage_info(platform.as_ref(), &last, &response.usage, &model).await;
        }
        toggle_thread_lock(platform.as_ref(), &thread.id, false).await;
    }
}

/// Reply with an error embed, logging if that fails too.
async fn report(ctx: &MessageContext, embed: Embed) {
    if let Err(e) = ctx.embed_reply(embed).await {
        error!(channel_id = %ctx.message().channel_id, error = %e, "Failed to report error");
    }
}

#[async_trait]
impl MessageHandler for GptMessageHandler {
    async fn handle(&self, ctx: &mut MessageContext) {
        if let Some(thread) = self.conversation_thread(ctx).await {
            if let Some(shared) = self.conversation(ctx, &thread).await {
                self.answer(ctx, &thread, shared).await;
            }
        }
        ctx.next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::Command;
    use crate::commands::test_support::chat_params;
    use crate::llm::MockLlmClient;
    use crate::platform::{ChatPlatform, EmbedField, MockPlatform, PlatformCall, User};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const THREAD: &str = "thread-1";

    fn setup() -> Arc<MockPlatform> {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel(ChannelInfo {
            id: THREAD.into(),
            parent_id: Some("general".into()),
            owner_id: platform.current_user_id(),
            is_thread: true,
        });
        platform
    }

    fn user_message(id: &str, content: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.into(),
            channel_id: THREAD.into(),
            author: User::new("u-1", "alice"),
            content: content.into(),
            ..Default::default()
        }
    }

    async fn run(platform: &Arc<MockPlatform>, params: &ChatParams, message: ChannelMessage) {
        let mut ctx = MessageContext::new(
            platform.clone(),
            Arc::new(Command::new("chat", "")),
            message,
            vec![Arc::new(GptMessageHandler::new(params.clone())) as Arc<dyn MessageHandler>],
        );
        ctx.next().await;
    }

    fn replies(platform: &MockPlatform) -> Vec<String> {
        platform
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::SendMessage { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cache_hit_appends_and_answers() {
        let platform = setup();
        let llm = Arc::new(MockLlmClient::with_response("Sure thing"));
        let params = chat_params(llm.clone());
        params.cache.add(
            THREAD,
            Conversation::new("gpt-3.5-turbo")
                .with_turn(Turn::user("hi"))
                .with_turn(Turn::assistant("hello")),
        );

        run(&platform, &params, user_message("m-5", "tell me more")).await;

        assert_eq!(replies(&platform), vec!["Sure thing".to_string()]);
        let conversation = params.cache.get(THREAD).unwrap();
        let conversation = conversation.lock().await;
        assert_eq!(
            conversation.turns,
            vec![
                Turn::user("hi"),
                Turn::assistant("hello"),
                Turn::user("tell me more"),
                Turn::assistant("Sure thing"),
            ]
        );
        assert_eq!(llm.chat_requests()[0].messages.len(), 3);

        let calls = platform.calls();
        assert!(calls.contains(&PlatformCall::TriggerTyping { channel_id: THREAD.into() }));
        let locks: Vec<bool> = calls
            .iter()
            .filter_map(|c| match c {
                PlatformCall::SetThreadLocked { locked, .. } => Some(*locked),
                _ => None,
            })
            .collect();
        assert_eq!(locks, vec![true, false]);
    }

    #[tokio::test]
    async fn test_cache_miss_rebuilds_from_thread() {
        let platform = setup();
        platform.add_message(ChannelMessage {
            id: THREAD.into(),
            channel_id: "general".into(),
            author: platform.bot_user(),
            embeds: vec![Embed {
                description: Some("first question".into()),
                fields: vec![
                    EmbedField { name: "".into(), value: "\u{200B}".into(), inline: false },
                    EmbedField { name: "Context".into(), value: "be brief".into(), inline: false },
                    EmbedField { name: "Model".into(), value: "gpt-4".into(), inline: false },
                    EmbedField { name: "Temperature".into(), value: "0.2".into(), inline: false },
                ],
                ..Default::default()
            }],
            ..Default::default()
        });
        let bot = platform.bot_user();
        platform.set_history(
            THREAD,
            vec![
                user_message("m-4", "second question"),
                ChannelMessage {
                    id: "m-3".into(),
                    channel_id: THREAD.into(),
                    author: bot.clone(),
                    content: "first answer".into(),
                    ..Default::default()
                },
                ChannelMessage {
                    id: "m-2".into(),
                    channel_id: THREAD.into(),
                    author: bot,
                    content: String::new(),
                    ..Default::default()
                },
            ],
        );
        let llm = Arc::new(MockLlmClient::with_response("answer"));
        let params = chat_params(llm.clone());

        run(&platform, &params, user_message("m-4", "second question")).await;

        let request = &llm.chat_requests()[0];
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(
            request.messages,
            vec![
                Turn::system("be brief"),
                Turn::user("first question"),
                Turn::assistant("first answer"),
                Turn::user("second question"),
            ]
        );
        assert!(params.cache.contains(THREAD));
    }

    #[tokio::test]
    async fn test_foreign_thread_is_ignored() {
        let platform = setup();
        // No starter message can be found, so the thread is not a chat.
        let llm = Arc::new(MockLlmClient::new());
        let params = chat_params(llm.clone());
        run(&platform, &params, user_message("m-1", "hello")).await;
        assert!(llm.chat_requests().is_empty());
        assert!(platform.calls().is_empty());
        assert!(!params.cache.contains(THREAD));
    }

    #[tokio::test]
    async fn test_bot_messages_and_ignored_channels_are_skipped() {
        let platform = setup();
        let llm = Arc::new(MockLlmClient::new());
        let params = chat_params(llm.clone());
        params.cache.add(THREAD, Conversation::new("gpt-3.5-turbo"));

        let mut own = user_message("m-1", "echo");
        own.author = platform.bot_user();
        run(&platform, &params, own).await;

        params.ignored.insert(THREAD);
        run(&platform, &params, user_message("m-2", "hello")).await;

        assert!(llm.chat_requests().is_empty());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_channels_not_owned_by_bot_are_skipped() {
        let platform = Arc::new(MockPlatform::new());
        platform.add_channel(ChannelInfo {
            id: THREAD.into(),
            parent_id: Some("general".into()),
            owner_id: Some("someone-else".into()),
            is_thread: true,
        });
        let llm = Arc::new(MockLlmClient::new());
        let params = chat_params(llm.clone());
        params.cache.add(THREAD, Conversation::new("gpt-3.5-turbo"));
        run(&platform, &params, user_message("m-1", "hello")).await;
        assert!(llm.chat_requests().is_empty());
    }

    #[tokio::test]
    async fn test_llm_failure_is_reported_and_thread_unlocked() {
        let platform = setup();
        let llm = Arc::new(MockLlmClient::new());
        llm.fail_on("chat");
        let params = chat_params(llm);
        params.cache.add(THREAD, Conversation::new("gpt-3.5-turbo"));

        run(&platform, &params, user_message("m-1", "hello")).await;

        let calls = platform.calls();
        let embeds = calls
            .iter()
            .find_map(|c| match c {
                PlatformCall::SendEmbeds { embeds, reply_to, .. } => {
                    assert_eq!(reply_to.as_deref(), Some("m-1"));
                    Some(embeds.clone())
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(embeds[0].title.as_deref(), Some("❌ OpenAI API failed"));
        assert_eq!(
            calls.last(),
            Some(&PlatformCall::SetThreadLocked { thread_id: THREAD.into(), locked: false })
        );
    }

    #[tokio::test]
    async fn test_long_answer_is_split_and_footer_on_last_part() {
        let platform = setup();
        let answer = "word ".repeat(1000);
        let llm = Arc::new(MockLlmClient::with_response(&answer));
        let params = chat_params(llm);
        params.cache.add(THREAD, Conversation::new("gpt-3.5-turbo"));

        run(&platform, &params, user_message("m-1", "hello")).await;

        assert_eq!(replies(&platform).len(), 3);
        let edited: Vec<String> = platform
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::EditMessage { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect();
        // Three replies got ids msg-1..msg-3.
        assert_eq!(edited, vec!["msg-3".to_string()]);
    }
}
