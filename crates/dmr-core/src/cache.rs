//! In-memory mirror of the relay store.
//!
//! Populated at startup by restore, mutated on lifecycle events, lost on
//! process restart. Entries live until explicitly removed; there is no
//! eviction. The cache holds derived copies only — on disagreement with
//! observed platform state, the store is corrected, never the cache trusted.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::{
    chat::types::WebhookHandle,
    domain::{ChannelId, UserId},
};

#[derive(Debug, Default)]
struct CacheState {
    channel_by_user: HashMap<UserId, ChannelId>,
    webhook_by_channel: HashMap<ChannelId, WebhookHandle>,
}

/// Process-wide relay lookup maps, explicitly owned and injected.
#[derive(Debug, Default)]
pub struct RelayCache {
    state: Mutex<CacheState>,
}

impl RelayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_channel_for_user(&self, user_id: UserId) -> Option<ChannelId> {
        self.state.lock().await.channel_by_user.get(&user_id).copied()
    }

    /// Reverse lookup; well-defined because mappings are 1:1.
    pub async fn get_user_for_channel(&self, channel_id: ChannelId) -> Option<UserId> {
        let st = self.state.lock().await;
        st.channel_by_user
            .iter()
            .find(|(_, c)| **c == channel_id)
            .map(|(u, _)| *u)
    }

    pub async fn get_webhook_for_channel(&self, channel_id: ChannelId) -> Option<WebhookHandle> {
        self.state
            .lock()
            .await
            .webhook_by_channel
            .get(&channel_id)
            .cloned()
    }

    pub async fn set(&self, user_id: UserId, channel_id: ChannelId, webhook: WebhookHandle) {
        let mut st = self.state.lock().await;
        st.channel_by_user.insert(user_id, channel_id);
        st.webhook_by_channel.insert(channel_id, webhook);
    }

    /// Cache a webhook handle for a channel without touching the user map.
    pub async fn set_webhook(&self, channel_id: ChannelId, webhook: WebhookHandle) {
        self.state
            .lock()
            .await
            .webhook_by_channel
            .insert(channel_id, webhook);
    }

    /// Drop the mapping for `user_id` (and its channel's webhook handle).
    /// Returns the channel that was mapped, if any.
    pub async fn remove(&self, user_id: UserId) -> Option<ChannelId> {
        let mut st = self.state.lock().await;
        let channel_id = st.channel_by_user.remove(&user_id)?;
        st.webhook_by_channel.remove(&channel_id);
        Some(channel_id)
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.channel_by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WebhookId;

    fn wh(id: u64) -> WebhookHandle {
        WebhookHandle {
            id: WebhookId(id),
            token: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn set_and_lookup_both_directions() {
        let cache = RelayCache::new();
        cache.set(UserId(1), ChannelId(10), wh(99)).await;

        assert_eq!(cache.get_channel_for_user(UserId(1)).await, Some(ChannelId(10)));
        assert_eq!(cache.get_user_for_channel(ChannelId(10)).await, Some(UserId(1)));
        assert_eq!(cache.get_webhook_for_channel(ChannelId(10)).await, Some(wh(99)));
        assert_eq!(cache.get_channel_for_user(UserId(2)).await, None);
    }

    #[tokio::test]
    async fn remove_drops_user_and_webhook_entries() {
        let cache = RelayCache::new();
        cache.set(UserId(1), ChannelId(10), wh(99)).await;

        assert_eq!(cache.remove(UserId(1)).await, Some(ChannelId(10)));
        assert_eq!(cache.get_channel_for_user(UserId(1)).await, None);
        assert_eq!(cache.get_webhook_for_channel(ChannelId(10)).await, None);
        assert_eq!(cache.remove(UserId(1)).await, None);
        assert_eq!(cache.active_count().await, 0);
    }
}
