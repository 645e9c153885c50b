//! Discord adapter (REST + gateway).
//!
//! This crate implements the `dmr-core` chat port over the Discord HTTP API
//! and feeds gateway events into the relay handlers.

pub mod embeds;
pub mod gateway;
pub mod handlers;
pub mod router;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use dmr_core::{
    chat::{
        types::{ChannelInfo, ChannelWebhook, ChatUser, WebhookHandle, WebhookMessage},
        ChatPort,
    },
    config::Config,
    domain::{ChannelId, GuildId, UserId, WebhookId},
    errors::Error,
    Result,
};

const CHANNEL_TYPE_TEXT: u64 = 0;
const CHANNEL_TYPE_CATEGORY: u64 = 4;

/// Ephemeral message flag on interaction responses.
pub const EPHEMERAL: u64 = 1 << 6;

#[derive(Clone)]
pub struct DiscordApi {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordApi {
    pub fn new(token: impl Into<String>, api_base: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.bot_token, &cfg.api_base, cfg.http_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn map_err(e: reqwest::Error) -> Error {
        Error::External(format!("discord request error: {e}"))
    }

    async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "{what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    /// GET returning `None` on 404.
    async fn get_json(&self, path: &str, what: &str) -> Result<Option<Value>> {
        let resp = self
            .http
            .get(self.url(path))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(Self::map_err)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp, what).await?;
        Ok(Some(resp.json().await.map_err(Self::map_err)?))
    }

    async fn post_json(&self, path: &str, body: &Value, what: &str) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .header("Authorization", self.auth())
            .json(body)
            .send()
            .await
            .map_err(Self::map_err)?;

        let resp = Self::check(resp, what).await?;
        resp.json().await.map_err(Self::map_err)
    }

    async fn delete_path(&self, path: &str, what: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(path))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(Self::map_err)?;

        Self::check(resp, what).await?;
        Ok(())
    }

    /// Plain channel message carrying a single embed (relay-channel notices).
    pub async fn send_embed(&self, channel_id: ChannelId, embed: Value) -> Result<()> {
        self.post_json(
            &format!("/channels/{}/messages", channel_id.0),
            &json!({ "embeds": [embed] }),
            "send channel message",
        )
        .await?;
        Ok(())
    }

    // ---- Interaction responses -------------------------------------------

    async fn interaction_callback(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        payload: Value,
        what: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!(
                "/interactions/{interaction_id}/{interaction_token}/callback"
            )))
            .header("Authorization", self.auth())
            .json(&payload)
            .send()
            .await
            .map_err(Self::map_err)?;

        Self::check(resp, what).await?;
        Ok(())
    }

    /// Ephemeral embed reply to a command/component/modal interaction.
    pub async fn respond_embed(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        embed: Value,
    ) -> Result<()> {
        self.interaction_callback(
            interaction_id,
            interaction_token,
            json!({ "type": 4, "data": { "embeds": [embed], "flags": EPHEMERAL } }),
            "interaction embed response",
        )
        .await
    }

    /// Ephemeral plain-text reply.
    pub async fn respond_text(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        text: &str,
    ) -> Result<()> {
        self.interaction_callback(
            interaction_id,
            interaction_token,
            json!({ "type": 4, "data": { "content": text, "flags": EPHEMERAL } }),
            "interaction text response",
        )
        .await
    }

    /// Ephemeral embed reply with message components (the confirm dialog).
    pub async fn respond_embed_with_components(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        embed: Value,
        components: Value,
    ) -> Result<()> {
        self.interaction_callback(
            interaction_id,
            interaction_token,
            json!({
                "type": 4,
                "data": { "embeds": [embed], "components": components, "flags": EPHEMERAL }
            }),
            "interaction dialog response",
        )
        .await
    }

    /// Open a modal form in response to a command.
    pub async fn respond_modal(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        modal: Value,
    ) -> Result<()> {
        self.interaction_callback(
            interaction_id,
            interaction_token,
            json!({ "type": 9, "data": modal }),
            "interaction modal response",
        )
        .await
    }

    /// Edit the message a component interaction originated from, dropping its
    /// buttons.
    pub async fn respond_update(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        embed: Value,
    ) -> Result<()> {
        self.interaction_callback(
            interaction_id,
            interaction_token,
            json!({ "type": 7, "data": { "embeds": [embed], "components": [] } }),
            "interaction update response",
        )
        .await
    }

    /// Ephemeral follow-up after the initial response has been sent.
    pub async fn followup_embed(
        &self,
        application_id: u64,
        interaction_token: &str,
        embed: Value,
    ) -> Result<()> {
        self.post_json(
            &format!("/webhooks/{application_id}/{interaction_token}"),
            &json!({ "embeds": [embed], "flags": EPHEMERAL }),
            "interaction followup",
        )
        .await?;
        Ok(())
    }

    pub async fn followup_text(
        &self,
        application_id: u64,
        interaction_token: &str,
        text: &str,
    ) -> Result<()> {
        self.post_json(
            &format!("/webhooks/{application_id}/{interaction_token}"),
            &json!({ "content": text, "flags": EPHEMERAL }),
            "interaction followup",
        )
        .await?;
        Ok(())
    }
}

// ---- Payload parsing ------------------------------------------------------

pub(crate) fn snowflake(v: &Value, key: &str) -> Option<u64> {
    v.get(key)?.as_str()?.parse().ok()
}

/// Avatar CDN url for a user object, when an avatar hash is present.
fn avatar_url(id: u64, v: &Value) -> Option<String> {
    v.get("avatar")
        .and_then(Value::as_str)
        .map(|hash| format!("https://cdn.discordapp.com/avatars/{id}/{hash}.png"))
}

pub fn user_from_json(v: &Value) -> Option<ChatUser> {
    let id = snowflake(v, "id")?;
    let name = v.get("username")?.as_str()?.to_string();
    let display_name = v
        .get("global_name")
        .and_then(Value::as_str)
        .unwrap_or(&name)
        .to_string();
    Some(ChatUser {
        id: UserId(id),
        name,
        display_name,
        avatar_url: avatar_url(id, v),
        is_bot: v.get("bot").and_then(Value::as_bool).unwrap_or(false),
    })
}

pub fn channel_from_json(v: &Value) -> Option<ChannelInfo> {
    Some(ChannelInfo {
        id: ChannelId(snowflake(v, "id")?),
        guild_id: snowflake(v, "guild_id").map(GuildId),
        name: v
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        parent_id: snowflake(v, "parent_id").map(ChannelId),
    })
}

fn webhook_from_json(v: &Value) -> Option<ChannelWebhook> {
    let token = v.get("token")?.as_str()?.to_string();
    Some(ChannelWebhook {
        name: v
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        handle: WebhookHandle {
            id: WebhookId(snowflake(v, "id")?),
            token,
        },
    })
}

#[async_trait]
impl ChatPort for DiscordApi {
    async fn fetch_user(&self, user_id: UserId) -> Result<Option<ChatUser>> {
        let Some(v) = self
            .get_json(&format!("/users/{}", user_id.0), "fetch user")
            .await?
        else {
            return Ok(None);
        };
        Ok(user_from_json(&v))
    }

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<ChannelInfo>> {
        let Some(v) = self
            .get_json(&format!("/channels/{}", channel_id.0), "fetch channel")
            .await?
        else {
            return Ok(None);
        };
        Ok(channel_from_json(&v))
    }

    async fn find_channel_by_name(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<ChannelInfo>> {
        let Some(v) = self
            .get_json(
                &format!("/guilds/{}/channels", guild_id.0),
                "list guild channels",
            )
            .await?
        else {
            return Ok(None);
        };

        let found = v.as_array().and_then(|channels| {
            channels
                .iter()
                .find(|c| {
                    c.get("type").and_then(Value::as_u64) == Some(CHANNEL_TYPE_TEXT)
                        && c.get("name").and_then(Value::as_str) == Some(name)
                })
                .and_then(channel_from_json)
        });
        Ok(found)
    }

    async fn category_exists(&self, guild_id: GuildId, category_id: ChannelId) -> Result<bool> {
        let Some(v) = self
            .get_json(&format!("/channels/{}", category_id.0), "fetch category")
            .await?
        else {
            return Ok(false);
        };

        let is_category = v.get("type").and_then(Value::as_u64) == Some(CHANNEL_TYPE_CATEGORY);
        let in_guild = snowflake(&v, "guild_id") == Some(guild_id.0);
        Ok(is_category && in_guild)
    }

    async fn create_channel(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
        name: &str,
        topic: &str,
    ) -> Result<ChannelInfo> {
        let v = self
            .post_json(
                &format!("/guilds/{}/channels", guild_id.0),
                &json!({
                    "name": name,
                    "type": CHANNEL_TYPE_TEXT,
                    "parent_id": category_id.0.to_string(),
                    "topic": topic,
                }),
                "create channel",
            )
            .await?;

        channel_from_json(&v)
            .ok_or_else(|| Error::External("create channel returned malformed payload".to_string()))
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        self.delete_path(&format!("/channels/{}", channel_id.0), "delete channel")
            .await
    }

    async fn create_webhook(&self, channel_id: ChannelId, name: &str) -> Result<WebhookHandle> {
        let v = self
            .post_json(
                &format!("/channels/{}/webhooks", channel_id.0),
                &json!({ "name": name }),
                "create webhook",
            )
            .await?;

        webhook_from_json(&v)
            .map(|w| w.handle)
            .ok_or_else(|| Error::External("create webhook returned malformed payload".to_string()))
    }

    async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<ChannelWebhook>> {
        let Some(v) = self
            .get_json(
                &format!("/channels/{}/webhooks", channel_id.0),
                "list webhooks",
            )
            .await?
        else {
            return Ok(Vec::new());
        };

        // Webhooks owned by other applications come without tokens and are
        // unusable for relaying; skip them.
        Ok(v.as_array()
            .map(|hooks| hooks.iter().filter_map(webhook_from_json).collect())
            .unwrap_or_default())
    }

    async fn execute_webhook(
        &self,
        webhook: &WebhookHandle,
        message: WebhookMessage,
    ) -> Result<()> {
        let path = format!("/webhooks/{}/{}?wait=true", webhook.id.0, webhook.token);
        let payload = json!({
            "content": message.content,
            "username": message.username,
            "avatar_url": message.avatar_url,
        });

        if message.files.is_empty() {
            self.post_json(&path, &payload, "execute webhook").await?;
            return Ok(());
        }

        let mut form = reqwest::multipart::Form::new().text("payload_json", payload.to_string());
        for (idx, file) in message.files.into_iter().enumerate() {
            form = form.part(
                format!("files[{idx}]"),
                reqwest::multipart::Part::bytes(file.bytes).file_name(file.filename),
            );
        }

        let resp = self
            .http
            .post(self.url(&path))
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await
            .map_err(Self::map_err)?;

        Self::check(resp, "execute webhook").await?;
        Ok(())
    }

    async fn send_dm(&self, user_id: UserId, text: &str) -> Result<()> {
        let channel = self
            .post_json(
                "/users/@me/channels",
                &json!({ "recipient_id": user_id.0.to_string() }),
                "open dm channel",
            )
            .await?;
        let dm_channel = snowflake(&channel, "id")
            .ok_or_else(|| Error::External("open dm channel returned malformed payload".to_string()))?;

        let resp = self
            .http
            .post(self.url(&format!("/channels/{dm_channel}/messages")))
            .header("Authorization", self.auth())
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(Self::map_err)?;

        // 403 here means the recipient has private messages disabled.
        if resp.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Delivery(format!(
                "user {} does not accept direct messages",
                user_id.0
            )));
        }
        Self::check(resp, "send dm").await?;
        Ok(())
    }

    async fn download_attachment(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().await.map_err(Self::map_err)?;
        let resp = Self::check(resp, "download attachment").await?;
        let bytes = resp.bytes().await.map_err(Self::map_err)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_parsing_prefers_global_name() {
        let v = json!({
            "id": "123",
            "username": "alice",
            "global_name": "Alice A",
            "avatar": "abc",
            "bot": false
        });
        let user = user_from_json(&v).unwrap();
        assert_eq!(user.id, UserId(123));
        assert_eq!(user.name, "alice");
        assert_eq!(user.display_name, "Alice A");
        assert_eq!(
            user.avatar_url.as_deref(),
            Some("https://cdn.discordapp.com/avatars/123/abc.png")
        );

        let bare = json!({ "id": "7", "username": "bob" });
        let user = user_from_json(&bare).unwrap();
        assert_eq!(user.display_name, "bob");
        assert_eq!(user.avatar_url, None);
        assert!(!user.is_bot);
    }

    #[test]
    fn webhook_parsing_requires_a_token() {
        let with_token = json!({ "id": "5", "name": "DM Relay Webhook", "token": "t" });
        assert!(webhook_from_json(&with_token).is_some());

        let foreign = json!({ "id": "6", "name": "Other App" });
        assert!(webhook_from_json(&foreign).is_none());
    }

    #[test]
    fn snowflakes_are_string_encoded() {
        let v = json!({ "id": "42", "other": 42 });
        assert_eq!(snowflake(&v, "id"), Some(42));
        // Numeric (non-string) ids are not produced by the API; reject them.
        assert_eq!(snowflake(&v, "other"), None);
        assert_eq!(snowflake(&v, "missing"), None);
    }
}
