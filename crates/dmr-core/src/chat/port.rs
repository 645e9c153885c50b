use async_trait::async_trait;

use crate::{
    chat::types::{ChannelInfo, ChannelWebhook, ChatUser, WebhookHandle, WebhookMessage},
    domain::{ChannelId, GuildId, UserId},
    Result,
};

/// Narrow platform port.
///
/// Discord is the first implementation; the lifecycle manager and the
/// forwarder only ever see this surface, so an in-memory fake can stand in
/// for the real API in tests.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// `None` when no user exists with this id.
    async fn fetch_user(&self, user_id: UserId) -> Result<Option<ChatUser>>;

    /// `None` when the channel no longer exists on the platform.
    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<ChannelInfo>>;

    async fn find_channel_by_name(
        &self,
        guild_id: GuildId,
        name: &str,
    ) -> Result<Option<ChannelInfo>>;

    /// `true` when `category_id` exists in `guild_id` and is a category.
    async fn category_exists(&self, guild_id: GuildId, category_id: ChannelId) -> Result<bool>;

    async fn create_channel(
        &self,
        guild_id: GuildId,
        category_id: ChannelId,
        name: &str,
        topic: &str,
    ) -> Result<ChannelInfo>;

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()>;

    async fn create_webhook(&self, channel_id: ChannelId, name: &str) -> Result<WebhookHandle>;

    /// Webhooks on the channel that carry usable credentials.
    async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<ChannelWebhook>>;

    async fn execute_webhook(
        &self,
        webhook: &WebhookHandle,
        message: WebhookMessage,
    ) -> Result<()>;

    /// Direct message into the user's private channel. A recipient with
    /// private messages disabled surfaces as `Error::Delivery`.
    async fn send_dm(&self, user_id: UserId, text: &str) -> Result<()>;

    async fn download_attachment(&self, url: &str) -> Result<Vec<u8>>;
}
