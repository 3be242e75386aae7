//! The `dalle` sub-command: image generation.
//!
//! Runs behind two middlewares. The first acknowledges the invocation with a
//! deferred response, the second rejects prompts the moderation endpoint
//! flags. A moderation outage lets the prompt through.

use crate::bot::{Command, CommandContext, CommandHandler, CommandOption, OptionChoice};
use crate::llm::{ImageRequest, LlmClient};
use crate::platform::{
    Embed, EmbedAuthor, EmbedImage, InteractionResponse, LinkButton, Reply,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const COMMAND_NAME: &str = "dalle";

pub const DEFAULT_SIZE: &str = "256x256";

const SIZES: [&str; 3] = ["256x256", "512x512", "1024x1024"];

const MAX_IMAGES: i64 = 4;

/// Display size of each generated image.
const IMAGE_DISPLAY_SIZE: u32 = 256;

const OPTION_PROMPT: &str = "prompt";
const OPTION_SIZE: &str = "size";
const OPTION_NUMBER: &str = "number";

const FLAGGED_PROMPT: &str = "The provided prompt contains text that violates OpenAI's usage policies and is not allowed by their safety system";

fn options() -> Vec<CommandOption> {
    let sizes = SIZES
        .iter()
        .map(|&size| {
            let name = if size == DEFAULT_SIZE {
                format!("{size} (Default)")
            } else {
                size.to_string()
            };
            OptionChoice::new(name, size)
        })
        .collect();
    vec![
        CommandOption::string(OPTION_PROMPT, "A text description of the desired image").required(),
        CommandOption::string(OPTION_SIZE, "The size of the generated images").with_choices(sizes),
        CommandOption::integer(
            OPTION_NUMBER,
            "The number of images to generate (default 1, max 4)",
        )
        .with_range(Some(1.0), Some(MAX_IMAGES as f64)),
    ]
}

pub fn command(llm: Arc<dyn LlmClient>) -> Command {
    Command::new(
        COMMAND_NAME,
        "Generate creative images from textual descriptions using OpenAI Dalle 2",
    )
    .with_options(options())
    .with_middleware(DeferredResponse)
    .with_middleware(Moderation { llm: llm.clone() })
    .with_handler(ImageHandler { llm })
}

/// Acknowledges the invocation before the slow work starts.
struct DeferredResponse;

#[async_trait]
impl CommandHandler for DeferredResponse {
    async fn handle(&self, ctx: &mut CommandContext) {
        info!(
            guild_id = %ctx.guild_id(),
            interaction_id = %ctx.interaction().id,
            user_id = %ctx.user().id,
            "Image interaction invoked"
        );
        if let Err(e) = ctx.respond(InteractionResponse::Deferred).await {
            error!(
                guild_id = %ctx.guild_id(),
                interaction_id = %ctx.interaction().id,
                error = %e,
                "Failed to respond to interaction"
            );
            return;
        }
        ctx.next().await;
    }
}

/// Stops the chain when the prompt is flagged.
struct Moderation {
    llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl CommandHandler for Moderation {
    async fn handle(&self, ctx: &mut CommandContext) {
        let guild_id = ctx.guild_id().to_string();
        let interaction_id = ctx.interaction().id.clone();

        let Some(prompt) = ctx.options().get_str(OPTION_PROMPT).map(str::to_string) else {
            warn!(%guild_id, %interaction_id, "Failed to parse prompt option");
            let reply = Reply {
                content: Some("ERROR: Failed to parse prompt option".to_string()),
                ..Default::default()
            };
            if let Err(e) = ctx.respond(InteractionResponse::Message(reply)).await {
                error!(%guild_id, %interaction_id, error = %e, "Failed to report missing prompt");
            }
            return;
        };

        match self.llm.moderate(&prompt).await {
            Ok(true) => {
                warn!(%guild_id, %interaction_id, prompt = %prompt, "Interaction was flagged by moderation");
                ctx.followup_error("❌ Error", FLAGGED_PROMPT).await;
            }
            Ok(false) => ctx.next().await,
            Err(e) => {
                warn!(%guild_id, %interaction_id, error = %e, "Moderation request failed, continuing");
                ctx.next().await;
            }
        }
    }
}

struct ImageHandler {
    llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl CommandHandler for ImageHandler {
    async fn handle(&self, ctx: &mut CommandContext) {
        let guild_id = ctx.guild_id().to_string();
        let interaction_id = ctx.interaction().id.clone();
        let options = ctx.options();

        let Some(prompt) = options.get_str(OPTION_PROMPT).map(str::to_string) else {
            error!(%guild_id, %interaction_id, "Failed to parse prompt option");
            ctx.followup_error("❌ Error", "Failed to parse prompt option").await;
            return;
        };
        let size = options.get_str(OPTION_SIZE).unwrap_or(DEFAULT_SIZE).to_string();
        let number = options.get_i64(OPTION_NUMBER).unwrap_or(1).clamp(1, MAX_IMAGES) as u32;

        info!(%guild_id, %interaction_id, size = %size, number, "Image request invoked");
        let request = ImageRequest {
            prompt: prompt.clone(),
            size: size.clone(),
            n: number,
            user: ctx.user().id.clone(),
        };
        let urls = match self.llm.create_images(request).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(%guild_id, %interaction_id, error = %e, "Image generation failed");
                ctx.followup_error("❌ OpenAI API failed", &e.to_string()).await;
                return;
            }
        };
        info!(%guild_id, %interaction_id, images = urls.len(), "Image request completed");

        let mut embeds = vec![Embed {
            author: Some(EmbedAuthor {
                name: prompt,
                icon_url: ctx.user().avatar_url.clone(),
            }),
            ..Default::default()
        }
        .footer(format!("Size: {size}, Images: {number}"))];
        let mut buttons = Vec::with_capacity(urls.len());
        for (i, url) in urls.into_iter().enumerate() {
            embeds.push(Embed {
                image: Some(EmbedImage {
                    url: url.clone(),
                    width: Some(IMAGE_DISPLAY_SIZE),
                    height: Some(IMAGE_DISPLAY_SIZE),
                }),
                ..Default::default()
            });
            buttons.push(LinkButton {
                label: format!("Image {}", i + 1),
                url,
            });
        }

        let reply = Reply {
            embeds,
            buttons,
            ..Default::default()
        };
        if let Err(e) = ctx.followup(reply).await {
            error!(%guild_id, %interaction_id, error = %e, "Failed to send images");
            ctx.followup_error("❌ Discord API Error", &e.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{InvocationOption, Router};
    use crate::llm::MockLlmClient;
    use crate::platform::{CommandData, Interaction, MockPlatform, PlatformCall, User};
    use pretty_assertions::assert_eq;

    fn invocation(options: Vec<InvocationOption>) -> Interaction {
        Interaction {
            id: "i-1".into(),
            guild_id: Some("guild-1".into()),
            channel_id: "general".into(),
            user: User::new("u-7", "bob"),
            data: CommandData {
                name: "image".into(),
                options: vec![InvocationOption::sub_command("dalle", options)],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn dispatch(llm: Arc<MockLlmClient>, platform: &Arc<MockPlatform>, options: Vec<InvocationOption>) {
        let router = Router::new(vec![super::super::command(llm)]);
        assert!(router.dispatch_interaction(platform.clone(), invocation(options)).await);
    }

    fn followups(platform: &MockPlatform) -> Vec<Reply> {
        platform
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::Followup { reply, .. } => Some(reply),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_generates_images() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        dispatch(
            llm.clone(),
            &platform,
            vec![
                InvocationOption::string("prompt", "a red fox"),
                InvocationOption::string("size", "512x512"),
                InvocationOption::integer("number", 2),
            ],
        )
        .await;

        assert_eq!(
            platform.calls()[0],
            PlatformCall::Respond {
                interaction_id: "i-1".into(),
                response: InteractionResponse::Deferred
            }
        );
        assert_eq!(llm.moderated(), vec!["a red fox".to_string()]);
        let request = &llm.image_requests()[0];
        assert_eq!(request.size, "512x512");
        assert_eq!(request.n, 2);
        assert_eq!(request.user, "u-7");

        let replies = followups(&platform);
        assert_eq!(replies.len(), 1);
        let reply = &replies[0];
        assert_eq!(reply.embeds.len(), 3);
        assert_eq!(reply.embeds[0].author.as_ref().unwrap().name, "a red fox");
        assert_eq!(
            reply.embeds[0].footer.as_ref().unwrap().text,
            "Size: 512x512, Images: 2"
        );
        assert_eq!(reply.embeds[1].image.as_ref().unwrap().width, Some(256));
        let labels: Vec<_> = reply.buttons.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["Image 1", "Image 2"]);
    }

    #[tokio::test]
    async fn test_defaults() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        dispatch(llm.clone(), &platform, vec![InvocationOption::string("prompt", "a cat")]).await;
        let request = &llm.image_requests()[0];
        assert_eq!(request.size, DEFAULT_SIZE);
        assert_eq!(request.n, 1);
    }

    #[tokio::test]
    async fn test_flagged_prompt_stops_chain() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new().flagging());
        dispatch(llm.clone(), &platform, vec![InvocationOption::string("prompt", "bad")]).await;

        assert!(llm.image_requests().is_empty());
        let replies = followups(&platform);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].embeds[0].description.as_deref(), Some(FLAGGED_PROMPT));
    }

    #[tokio::test]
    async fn test_moderation_outage_fails_open() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        llm.fail_on("moderate");
        dispatch(llm.clone(), &platform, vec![InvocationOption::string("prompt", "a cat")]).await;
        assert_eq!(llm.image_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_prompt_is_rejected_by_moderation() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        dispatch(llm.clone(), &platform, vec![]).await;
        assert!(llm.moderated().is_empty());
        assert!(llm.image_requests().is_empty());
        let calls = platform.calls();
        assert_eq!(calls.len(), 2);
        let PlatformCall::Respond {
            response: InteractionResponse::Message(reply),
            ..
        } = &calls[1]
        else {
            panic!("expected a message response");
        };
        assert_eq!(reply.content.as_deref(), Some("ERROR: Failed to parse prompt option"));
    }

    #[tokio::test]
    async fn test_image_handler_reports_missing_prompt() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        let handler: Arc<dyn CommandHandler> = Arc::new(ImageHandler { llm: llm.clone() });
        let mut ctx = CommandContext::new(
            platform.clone(),
            Arc::new(Command::new("dalle", "")),
            invocation(vec![]),
            &[],
            vec![handler],
        );
        ctx.next().await;

        assert!(llm.image_requests().is_empty());
        assert_eq!(
            followups(&platform),
            vec![Reply::error("❌ Error", "Failed to parse prompt option")]
        );
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported() {
        let platform = Arc::new(MockPlatform::new());
        let llm = Arc::new(MockLlmClient::new());
        llm.fail_on("images");
        dispatch(llm, &platform, vec![InvocationOption::string("prompt", "a cat")]).await;
        let replies = followups(&platform);
        assert_eq!(replies[0].embeds[0].title.as_deref(), Some("❌ OpenAI API failed"));
    }

    #[test]
    fn test_option_schema() {
        let options = options();
        assert_eq!(options[1].choices[0].name, "256x256 (Default)");
        assert_eq!(options[1].choices.len(), 3);
        assert_eq!(options[2].min_value, Some(1.0));
        assert_eq!(options[2].max_value, Some(4.0));
    }
}
