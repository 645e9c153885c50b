//! Bidirectional message mirroring between private channels and relays.

use std::sync::Arc;

use tracing::info;

use crate::{
    chat::{
        types::{ChatUser, InboundDm, OutboundFile, WebhookMessage},
        ChatPort,
    },
    config::Config,
    relay::{EstablishedRelay, RelayService},
    Result,
};

/// Outcome of forwarding an inbound private message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Mirrored into the relay channel.
    Forwarded,
    /// No relay exists for the author; the message is dropped.
    NoRelay,
    /// The relay channel is gone; the mapping was pruned, the message dropped.
    Pruned,
}

/// Copies message content between a user's private channel and the relay.
pub struct Forwarder {
    cfg: Arc<Config>,
    chat: Arc<dyn ChatPort>,
    relays: Arc<RelayService>,
}

impl Forwarder {
    pub fn new(cfg: Arc<Config>, chat: Arc<dyn ChatPort>, relays: Arc<RelayService>) -> Self {
        Self { cfg, chat, relays }
    }

    /// User -> relay: mirror an inbound DM into the author's relay channel,
    /// impersonating the author through the channel webhook.
    pub async fn forward_inbound(&self, dm: &InboundDm) -> Result<ForwardOutcome> {
        let cached = self
            .relays
            .cache()
            .get_channel_for_user(dm.author.id)
            .await;
        let channel_id = match cached {
            Some(channel_id) => channel_id,
            // Cache miss falls back to the store (a mapping skipped during
            // restore, for example) and repopulates it.
            None => match self.relays.store().get(dm.author.id).await? {
                Some(mapping) => {
                    self.relays
                        .cache()
                        .set(mapping.user_id, mapping.channel_id, mapping.webhook)
                        .await;
                    mapping.channel_id
                }
                None => return Ok(ForwardOutcome::NoRelay),
            },
        };

        if self.chat.fetch_channel(channel_id).await?.is_none() {
            self.relays.prune(dm.author.id, channel_id).await?;
            return Ok(ForwardOutcome::Pruned);
        }

        let webhook = self.relays.ensure_webhook(channel_id).await?;

        let mut content = dm.content.clone();
        let mut files = Vec::new();
        for attachment in &dm.attachments {
            if attachment.size > self.cfg.attachment_max_bytes {
                content.push_str(&format!(
                    "\nAttachment: {} (File too large: {} bytes)",
                    attachment.filename, attachment.size
                ));
                continue;
            }
            match self.chat.download_attachment(&attachment.url).await {
                Ok(bytes) => files.push(OutboundFile {
                    filename: attachment.filename.clone(),
                    bytes,
                }),
                Err(e) => {
                    // Undownloadable attachments degrade to a placeholder
                    // rather than vanishing.
                    content.push_str(&format!(
                        "\nAttachment: {} (Error: {e})",
                        attachment.filename
                    ));
                }
            }
        }

        self.chat
            .execute_webhook(
                &webhook,
                WebhookMessage {
                    content,
                    username: dm.author.display_name.clone(),
                    avatar_url: dm.author.avatar_url.clone(),
                    files,
                },
            )
            .await?;

        info!(
            user_id = dm.author.id.0,
            channel_id = channel_id.0,
            "forwarded DM to relay channel"
        );
        Ok(ForwardOutcome::Forwarded)
    }

    /// Owner -> user: direct delivery into the user's private channel.
    /// Delivery failures surface to the caller for reporting; no retry.
    pub async fn send_owner_dm(&self, target: &ChatUser, text: &str) -> Result<()> {
        self.chat.send_dm(target.id, text).await
    }

    /// Mirror an owner-sent message into the relay channel, impersonating the
    /// owner's display identity.
    pub async fn mirror_owner_message(
        &self,
        relay: &EstablishedRelay,
        owner: &ChatUser,
        text: &str,
    ) -> Result<()> {
        self.chat
            .execute_webhook(
                &relay.webhook,
                WebhookMessage {
                    content: text.to_string(),
                    username: owner.display_name.clone(),
                    avatar_url: owner.avatar_url.clone(),
                    files: Vec::new(),
                },
            )
            .await
    }
}
