//! Discord REST implementation of [`ChatPlatform`].

use super::model::{self, DiscordChannel, DiscordMessage};
use async_trait::async_trait;
use relaybot_core::bot::CommandDefinition;
use relaybot_core::error::PlatformError;
use relaybot_core::platform::{
    ChannelInfo, ChannelMessage, ChatPlatform, Embed, Interaction, InteractionResponse,
    MessageEdit, PlatformResult, RegisteredCommand, Reply, ThreadStart,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub const API_BASE: &str = "https://discord.com/api/v10";

/// Largest page the message history endpoint returns.
const MAX_HISTORY_PAGE: usize = 100;

const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED_CHANNEL_MESSAGE: u8 = 5;

/// Identity learned from the gateway's READY event.
#[derive(Debug, Clone, Default)]
struct Session {
    application_id: String,
    user_id: String,
}

pub struct DiscordPlatform {
    client: Client,
    base_url: String,
    token: String,
    session: RwLock<Option<Session>>,
}

impl DiscordPlatform {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            session: RwLock::new(None),
        }
    }

    /// Record the application and bot user ids once the gateway is ready.
    pub fn set_session(&self, application_id: impl Into<String>, user_id: impl Into<String>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            application_id: application_id.into(),
            user_id: user_id.into(),
        });
    }

    fn application_id(&self) -> PlatformResult<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.application_id.clone())
            .ok_or_else(|| PlatformError::Gateway {
                message: "Session is not ready yet".to_string(),
            })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> PlatformResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Sending Discord request");

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", self.auth_header());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| PlatformError::ApiRequest {
            message: format!("Request failed: {}", e),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| PlatformError::ApiRequest {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(map_http_error(status, path, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| PlatformError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> PlatformResult<T> {
        let value = self.request(method, path, body).await?;
        parse(value)
    }

    async fn post_message(&self, channel_id: &str, mut body: Value, reply_to: Option<&str>) -> PlatformResult<ChannelMessage> {
        if let Some(message_id) = reply_to {
            body["message_reference"] = json!({ "message_id": message_id });
        }
        let message: DiscordMessage = self
            .fetch(Method::POST, &format!("/channels/{channel_id}/messages"), Some(body))
            .await?;
        Ok(message.into())
    }

    fn commands_path(&self, guild_id: Option<&str>) -> PlatformResult<String> {
        Ok(commands_path(&self.application_id()?, guild_id))
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> PlatformResult<T> {
    serde_json::from_value(value).map_err(|e| PlatformError::ResponseParse {
        message: e.to_string(),
    })
}

fn commands_path(application_id: &str, guild_id: Option<&str>) -> String {
    match guild_id {
        Some(guild) => format!("/applications/{application_id}/guilds/{guild}/commands"),
        None => format!("/applications/{application_id}/commands"),
    }
}

fn map_http_error(status: StatusCode, path: &str, body: &str) -> PlatformError {
    match status.as_u16() {
        401 => PlatformError::AuthFailed,
        404 => PlatformError::NotFound {
            resource: path.to_string(),
        },
        code => PlatformError::Api {
            status: code,
            message: serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| body.to_string()),
        },
    }
}

fn callback_json(response: &InteractionResponse) -> Value {
    match response {
        InteractionResponse::Deferred => json!({ "type": CALLBACK_DEFERRED_CHANNEL_MESSAGE }),
        InteractionResponse::Message(reply) => json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": model::reply_json(reply),
        }),
    }
}

fn edit_json(edit: &MessageEdit) -> Value {
    let mut body = json!({});
    if let Some(content) = &edit.content {
        body["content"] = json!(content);
    }
    if let Some(embeds) = &edit.embeds {
        body["embeds"] = json!(embeds);
    }
    body
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn current_user_id(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user_id.clone())
    }

    async fn respond(
        &self,
        interaction: &Interaction,
        response: InteractionResponse,
    ) -> PlatformResult<()> {
        let path = format!("/interactions/{}/{}/callback", interaction.id, interaction.token);
        self.request(Method::POST, &path, Some(callback_json(&response)))
            .await
            .map(|_| ())
    }

    async fn followup(
        &self,
        interaction: &Interaction,
        reply: Reply,
    ) -> PlatformResult<ChannelMessage> {
        let path = format!(
            "/webhooks/{}/{}?wait=true",
            self.application_id()?,
            interaction.token
        );
        let message: DiscordMessage = self
            .fetch(Method::POST, &path, Some(model::reply_json(&reply)))
            .await?;
        Ok(message.into())
    }

    async fn original_response(&self, interaction: &Interaction) -> PlatformResult<ChannelMessage> {
        let path = format!(
            "/webhooks/{}/{}/messages/@original",
            self.application_id()?,
            interaction.token
        );
        let message: DiscordMessage = self.fetch(Method::GET, &path, None).await?;
        Ok(message.into())
    }

    async fn channel(&self, channel_id: &str) -> PlatformResult<ChannelInfo> {
        let channel: DiscordChannel = self
            .fetch(Method::GET, &format!("/channels/{channel_id}"), None)
            .await?;
        Ok(channel.into())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage> {
        self.post_message(channel_id, json!({ "content": content }), reply_to)
            .await
    }

    async fn send_embeds(
        &self,
        channel_id: &str,
        embeds: Vec<Embed>,
        reply_to: Option<&str>,
    ) -> PlatformResult<ChannelMessage> {
        self.post_message(channel_id, json!({ "embeds": embeds }), reply_to)
            .await
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> PlatformResult<ChannelMessage> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let message: DiscordMessage = self
            .fetch(Method::PATCH, &path, Some(edit_json(&edit)))
            .await?;
        Ok(message.into())
    }

    async fn message(&self, channel_id: &str, message_id: &str) -> PlatformResult<ChannelMessage> {
        let path = format!("/channels/{channel_id}/messages/{message_id}");
        let message: DiscordMessage = self.fetch(Method::GET, &path, None).await?;
        Ok(message.into())
    }

    async fn messages(&self, channel_id: &str, limit: usize) -> PlatformResult<Vec<ChannelMessage>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let path = format!("/channels/{channel_id}/messages?limit={limit}");
        let messages: Vec<DiscordMessage> = self.fetch(Method::GET, &path, None).await?;
        Ok(messages.into_iter().map(ChannelMessage::from).collect())
    }

    async fn start_thread(
        &self,
        channel_id: &str,
        message_id: &str,
        thread: ThreadStart,
    ) -> PlatformResult<ChannelInfo> {
        // Threads started from a message are public, so `invitable` does not apply.
        let path = format!("/channels/{channel_id}/messages/{message_id}/threads");
        let body = json!({
            "name": thread.name,
            "auto_archive_duration": thread.auto_archive_minutes,
        });
        let channel: DiscordChannel = self.fetch(Method::POST, &path, Some(body)).await?;
        Ok(channel.into())
    }

    async fn set_thread_locked(&self, thread_id: &str, locked: bool) -> PlatformResult<()> {
        self.request(
            Method::PATCH,
            &format!("/channels/{thread_id}"),
            Some(json!({ "locked": locked })),
        )
        .await
        .map(|_| ())
    }

    async fn add_thread_member(&self, thread_id: &str, user_id: &str) -> PlatformResult<()> {
        let path = format!("/channels/{thread_id}/thread-members/{user_id}");
        self.request(Method::PUT, &path, None).await.map(|_| ())
    }

    async fn rename_channel(&self, channel_id: &str, name: &str) -> PlatformResult<()> {
        self.request(
            Method::PATCH,
            &format!("/channels/{channel_id}"),
            Some(json!({ "name": name })),
        )
        .await
        .map(|_| ())
    }

    async fn trigger_typing(&self, channel_id: &str) -> PlatformResult<()> {
        self.request(Method::POST, &format!("/channels/{channel_id}/typing"), None)
            .await
            .map(|_| ())
    }

    async fn fetch_attachment(&self, url: &str) -> PlatformResult<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlatformError::ApiRequest {
                message: format!("Attachment download failed: {}", e),
            })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| PlatformError::ApiRequest {
            message: format!("Failed to read attachment: {}", e),
        })?;
        if !status.is_success() {
            return Err(map_http_error(status, url, &text));
        }
        Ok(text)
    }

    async fn overwrite_commands(
        &self,
        guild_id: Option<&str>,
        definitions: &[CommandDefinition],
    ) -> PlatformResult<Vec<RegisteredCommand>> {
        let path = self.commands_path(guild_id)?;
        let body: Vec<Value> = definitions.iter().map(model::command_json).collect();
        self.fetch(Method::PUT, &path, Some(json!(body))).await
    }

    async fn delete_command(&self, guild_id: Option<&str>, command_id: &str) -> PlatformResult<()> {
        let path = format!("{}/{}", self.commands_path(guild_id)?, command_id);
        self.request(Method::DELETE, &path, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_unknown_until_ready() {
        let platform = DiscordPlatform::new("token");
        assert_eq!(platform.current_user_id(), None);
        assert!(matches!(
            platform.application_id(),
            Err(PlatformError::Gateway { .. })
        ));

        platform.set_session("app-1", "bot-1");
        assert_eq!(platform.current_user_id().as_deref(), Some("bot-1"));
        assert_eq!(platform.application_id().unwrap(), "app-1");
        assert_eq!(
            platform.commands_path(Some("g-1")).unwrap(),
            "/applications/app-1/guilds/g-1/commands"
        );
    }

    #[test]
    fn test_commands_path_global() {
        assert_eq!(commands_path("app", None), "/applications/app/commands");
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let platform = DiscordPlatform::with_base_url("t", "http://localhost:9999/api/");
        assert_eq!(platform.base_url, "http://localhost:9999/api");
        assert_eq!(platform.auth_header(), "Bot t");
    }

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            map_http_error(StatusCode::UNAUTHORIZED, "/channels/1", ""),
            PlatformError::AuthFailed
        ));
        match map_http_error(StatusCode::NOT_FOUND, "/channels/1", "") {
            PlatformError::NotFound { resource } => assert_eq!(resource, "/channels/1"),
            other => panic!("Expected NotFound, got {:?}", other),
        }
        match map_http_error(
            StatusCode::FORBIDDEN,
            "/channels/1",
            r#"{"message": "Missing Access", "code": 50001}"#,
        ) {
            PlatformError::Api { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "Missing Access");
            }
            other => panic!("Expected Api, got {:?}", other),
        }
    }

    #[test]
    fn test_callback_json() {
        assert_eq!(
            callback_json(&InteractionResponse::Deferred),
            json!({ "type": 5 })
        );
        let body = callback_json(&InteractionResponse::Message(Reply::error("❌ Error", "nope")));
        assert_eq!(body["type"], json!(4));
        assert_eq!(body["data"]["embeds"][0]["title"], json!("❌ Error"));
    }

    #[test]
    fn test_edit_json_only_sends_changed_parts() {
        assert_eq!(edit_json(&MessageEdit::content("done")), json!({ "content": "done" }));
        let body = edit_json(&MessageEdit::error("❌ Discord API Error", "boom"));
        assert_eq!(body["content"], json!(""));
        assert_eq!(body["embeds"][0]["color"], json!(0xff0000));
    }
}
