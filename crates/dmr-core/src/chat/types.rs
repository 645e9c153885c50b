use crate::domain::{ChannelId, GuildId, UserId, WebhookId};

/// A platform user as seen by the relay.
///
/// Platform-specific fields (discriminators, flags, locales) stay in the
/// adapter.
#[derive(Clone, Debug)]
pub struct ChatUser {
    pub id: UserId,
    /// Login name; relay channels are named after its lowercased form.
    pub name: String,
    /// Shown via webhook impersonation.
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_bot: bool,
}

/// A guild text channel usable as a relay target.
#[derive(Clone, Debug)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub name: String,
    pub parent_id: Option<ChannelId>,
}

/// Webhook credentials; enough to execute the webhook without refetching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookHandle {
    pub id: WebhookId,
    pub token: String,
}

/// A webhook as listed on a channel, with its display name for discovery.
#[derive(Clone, Debug)]
pub struct ChannelWebhook {
    pub name: String,
    pub handle: WebhookHandle,
}

/// File re-uploaded alongside a forwarded message.
#[derive(Clone, Debug)]
pub struct OutboundFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Message emitted through a relay webhook, impersonating a user.
#[derive(Clone, Debug, Default)]
pub struct WebhookMessage {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub files: Vec<OutboundFile>,
}

/// Attachment metadata on an inbound private message.
#[derive(Clone, Debug)]
pub struct InboundAttachment {
    pub filename: String,
    pub size: u64,
    pub url: String,
}

/// A private message received from an external user.
#[derive(Clone, Debug)]
pub struct InboundDm {
    pub author: ChatUser,
    pub channel_id: ChannelId,
    pub content: String,
    pub attachments: Vec<InboundAttachment>,
}
