//! Relay lifecycle: establish, restore, close.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cache::RelayCache,
    chat::{
        types::{ChannelInfo, ChatUser, WebhookHandle},
        ChatPort,
    },
    config::Config,
    domain::{ChannelId, GuildId, UserId},
    errors::Error,
    store::{RelayMapping, RelayStore},
    Result,
};

/// Well-known webhook name used to discover and re-attach relay webhooks.
pub const WEBHOOK_NAME: &str = "DM Relay Webhook";

/// Per-user locks serializing `establish`, so two near-simultaneous sends to
/// the same user cannot race to create duplicate channels.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Live relay endpoints returned by `establish`.
#[derive(Clone, Debug)]
pub struct EstablishedRelay {
    pub channel_id: ChannelId,
    pub webhook: WebhookHandle,
    /// `false` when this call created the channel.
    pub reused: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub pruned: usize,
}

/// Establishes, restores and closes relay mappings.
pub struct RelayService {
    cfg: Arc<Config>,
    chat: Arc<dyn ChatPort>,
    store: RelayStore,
    cache: RelayCache,
    locks: UserLocks,
    pending_deletes: Arc<Mutex<HashMap<u64, CancellationToken>>>,
}

impl RelayService {
    pub fn new(cfg: Arc<Config>, chat: Arc<dyn ChatPort>, store: RelayStore) -> Self {
        Self {
            cfg,
            chat,
            store,
            cache: RelayCache::new(),
            locks: UserLocks::default(),
            pending_deletes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &RelayCache {
        &self.cache
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }

    /// Ensure a relay exists for `user`, creating channel and webhook as
    /// needed, and persist + cache the mapping. Serialized per user.
    pub async fn establish(&self, user: &ChatUser, guild_id: GuildId) -> Result<EstablishedRelay> {
        let _guard = self.locks.lock_user(user.id).await;

        // Reuse the mapped channel when it is still live.
        if let Some(channel_id) = self.cache.get_channel_for_user(user.id).await {
            if self.chat.fetch_channel(channel_id).await?.is_some() {
                self.cancel_pending_delete(channel_id).await;
                let webhook = self.ensure_webhook(channel_id).await?;
                return Ok(EstablishedRelay {
                    channel_id,
                    webhook,
                    reused: true,
                });
            }
            // Channel vanished out-of-band; correct the store to match
            // observed platform reality.
            self.prune(user.id, channel_id).await?;
        }

        let channel_name = user.name.to_lowercase();

        // A pre-existing channel named after the user is attached to, not
        // duplicated.
        let (channel, reused) = match self
            .chat
            .find_channel_by_name(guild_id, &channel_name)
            .await?
        {
            Some(existing) => (existing, true),
            None => (
                self.create_relay_channel(user, guild_id, &channel_name)
                    .await?,
                false,
            ),
        };

        self.cancel_pending_delete(channel.id).await;
        let webhook = self.ensure_webhook(channel.id).await?;

        let mapping = RelayMapping {
            user_id: user.id,
            channel_id: channel.id,
            webhook: webhook.clone(),
        };
        self.store.put(&mapping).await?;
        self.cache.set(user.id, channel.id, webhook.clone()).await;
        info!(
            user_id = user.id.0,
            channel_id = channel.id.0,
            reused,
            "relay established"
        );

        Ok(EstablishedRelay {
            channel_id: channel.id,
            webhook,
            reused,
        })
    }

    async fn create_relay_channel(
        &self,
        user: &ChatUser,
        guild_id: GuildId,
        name: &str,
    ) -> Result<ChannelInfo> {
        let Some(category_id) = self.cfg.relay_category_id else {
            warn!("DM_CATEGORY_ID not configured; cannot create relay channel");
            return Err(Error::NotFound(
                "relay category is not configured (DM_CATEGORY_ID)".to_string(),
            ));
        };

        if !self.chat.category_exists(guild_id, category_id).await? {
            warn!(
                category_id = category_id.0,
                guild_id = guild_id.0,
                "category validation failed for relay channel"
            );
            return Err(Error::NotFound(format!(
                "category {} not found in guild {}",
                category_id.0, guild_id.0
            )));
        }

        let topic = format!("DM relay with {} ({})", user.display_name, user.id.0);
        let channel = self
            .chat
            .create_channel(guild_id, category_id, name, &topic)
            .await?;
        info!(
            channel_id = channel.id.0,
            guild_id = guild_id.0,
            user_id = user.id.0,
            "created relay channel"
        );
        Ok(channel)
    }

    /// Lazy, self-healing webhook resolution for `channel_id`: cached handle,
    /// else discovery by the well-known name, else creation. Caches the
    /// result before returning.
    pub async fn ensure_webhook(&self, channel_id: ChannelId) -> Result<WebhookHandle> {
        if let Some(webhook) = self.cache.get_webhook_for_channel(channel_id).await {
            return Ok(webhook);
        }

        let found = self
            .chat
            .list_webhooks(channel_id)
            .await?
            .into_iter()
            .find(|w| w.name == WEBHOOK_NAME)
            .map(|w| w.handle);

        let webhook = match found {
            Some(webhook) => webhook,
            None => {
                let webhook = self.chat.create_webhook(channel_id, WEBHOOK_NAME).await?;
                info!(
                    channel_id = channel_id.0,
                    webhook_id = webhook.id.0,
                    "created relay webhook"
                );
                webhook
            }
        };

        self.cache.set_webhook(channel_id, webhook.clone()).await;
        Ok(webhook)
    }

    /// Rebuild the cache from the store, pruning mappings whose channel no
    /// longer exists. Runs once after the platform connection is ready.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let mappings = self.store.list_all().await?;
        info!(count = mappings.len(), "restoring relay mappings");

        let mut summary = RestoreSummary::default();
        for mapping in mappings {
            match self.chat.fetch_channel(mapping.channel_id).await {
                Ok(Some(_)) => {
                    self.cache
                        .set(mapping.user_id, mapping.channel_id, mapping.webhook)
                        .await;
                    summary.restored += 1;
                }
                Ok(None) => {
                    warn!(
                        user_id = mapping.user_id.0,
                        channel_id = mapping.channel_id.0,
                        "relay channel gone, removing mapping"
                    );
                    self.store.delete(mapping.user_id).await?;
                    summary.pruned += 1;
                }
                Err(e) => {
                    // A transient platform error must not discard a live
                    // relay; leave the record for the next restore.
                    warn!(
                        user_id = mapping.user_id.0,
                        error = %e,
                        "skipping relay during restore"
                    );
                }
            }
        }

        info!(
            restored = summary.restored,
            pruned = summary.pruned,
            "relay restore complete"
        );
        Ok(summary)
    }

    /// Remove the mapping for `user_id` from cache and store after an owner
    /// confirmed the closure. Returns the channel that was mapped, if any.
    pub async fn close_confirmed(&self, user_id: UserId) -> Result<Option<ChannelId>> {
        let channel = self.cache.remove(user_id).await;
        self.store.delete(user_id).await?;
        if let Some(channel_id) = channel {
            info!(user_id = user_id.0, channel_id = channel_id.0, "relay closed");
        }
        Ok(channel)
    }

    /// Drop a mapping whose backing channel was observed missing.
    pub async fn prune(&self, user_id: UserId, channel_id: ChannelId) -> Result<()> {
        self.cache.remove(user_id).await;
        self.store.delete(user_id).await?;
        warn!(
            user_id = user_id.0,
            channel_id = channel_id.0,
            "pruned relay with missing channel"
        );
        Ok(())
    }

    /// Delete `channel_id` after the configured grace delay, unless a reopen
    /// cancels it first.
    pub async fn schedule_channel_deletion(&self, channel_id: ChannelId) {
        self.schedule_channel_deletion_after(channel_id, self.cfg.delete_grace)
            .await;
    }

    pub async fn schedule_channel_deletion_after(&self, channel_id: ChannelId, delay: Duration) {
        let token = CancellationToken::new();
        {
            let mut pending = self.pending_deletes.lock().await;
            // A fresh request supersedes any earlier timer for this channel.
            if let Some(previous) = pending.insert(channel_id.0, token.clone()) {
                previous.cancel();
            }
        }

        let chat = Arc::clone(&self.chat);
        let pending = Arc::clone(&self.pending_deletes);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(channel_id = channel_id.0, "relay channel deletion cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    pending.lock().await.remove(&channel_id.0);
                    if let Err(e) = chat.delete_channel(channel_id).await {
                        warn!(
                            channel_id = channel_id.0,
                            error = %e,
                            "failed to delete relay channel"
                        );
                    }
                }
            }
        });
    }

    /// Cancel a pending deferred deletion, if any (reopen within the window).
    pub async fn cancel_pending_delete(&self, channel_id: ChannelId) {
        if let Some(token) = self.pending_deletes.lock().await.remove(&channel_id.0) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::{ChannelWebhook, WebhookMessage};
    use crate::domain::WebhookId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            bot_token: "test-token".to_string(),
            owner_id: UserId(1),
            relay_guild_id: Some(GuildId(500)),
            relay_category_id: Some(ChannelId(900)),
            database_path: "ignored".into(),
            attachment_max_bytes: 8 * 1024 * 1024,
            confirm_timeout: Duration::from_secs(60),
            delete_grace: Duration::from_secs(5),
            api_base: "http://localhost".to_string(),
            gateway_url: "ws://localhost".to_string(),
            http_timeout: Duration::from_secs(5),
        })
    }

    fn user(id: u64, name: &str) -> ChatUser {
        ChatUser {
            id: UserId(id),
            name: name.to_string(),
            display_name: name.to_string(),
            avatar_url: None,
            is_bot: false,
        }
    }

    #[derive(Default)]
    struct FakeState {
        channels: HashMap<u64, ChannelInfo>,
        webhooks: HashMap<u64, Vec<ChannelWebhook>>,
        category_missing: bool,
        deleted_channels: Vec<u64>,
    }

    /// In-memory platform double for lifecycle tests.
    #[derive(Default)]
    struct FakeChat {
        state: StdMutex<FakeState>,
        next_id: AtomicU64,
        channels_created: AtomicU64,
        webhooks_created: AtomicU64,
    }

    impl FakeChat {
        fn new() -> Self {
            let fake = Self::default();
            fake.next_id.store(1000, Ordering::SeqCst);
            fake
        }

        fn alloc_id(&self) -> u64 {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }

        fn insert_channel(&self, id: u64, name: &str) {
            self.state.lock().unwrap().channels.insert(
                id,
                ChannelInfo {
                    id: ChannelId(id),
                    guild_id: Some(GuildId(500)),
                    name: name.to_string(),
                    parent_id: Some(ChannelId(900)),
                },
            );
        }

        fn insert_webhook(&self, channel_id: u64, name: &str, webhook_id: u64) {
            self.state
                .lock()
                .unwrap()
                .webhooks
                .entry(channel_id)
                .or_default()
                .push(ChannelWebhook {
                    name: name.to_string(),
                    handle: WebhookHandle {
                        id: WebhookId(webhook_id),
                        token: format!("tok-{webhook_id}"),
                    },
                });
        }

        fn drop_channel(&self, id: u64) {
            self.state.lock().unwrap().channels.remove(&id);
        }

        fn set_category_missing(&self, missing: bool) {
            self.state.lock().unwrap().category_missing = missing;
        }
    }

    #[async_trait]
    impl ChatPort for FakeChat {
        async fn fetch_user(&self, _user_id: UserId) -> Result<Option<ChatUser>> {
            Err(Error::External(
                "FakeChat::fetch_user not implemented for tests".to_string(),
            ))
        }

        async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<ChannelInfo>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .channels
                .get(&channel_id.0)
                .cloned())
        }

        async fn find_channel_by_name(
            &self,
            _guild_id: GuildId,
            name: &str,
        ) -> Result<Option<ChannelInfo>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .channels
                .values()
                .find(|c| c.name == name)
                .cloned())
        }

        async fn category_exists(
            &self,
            _guild_id: GuildId,
            _category_id: ChannelId,
        ) -> Result<bool> {
            Ok(!self.state.lock().unwrap().category_missing)
        }

        async fn create_channel(
            &self,
            guild_id: GuildId,
            category_id: ChannelId,
            name: &str,
            _topic: &str,
        ) -> Result<ChannelInfo> {
            self.channels_created.fetch_add(1, Ordering::SeqCst);
            let id = self.alloc_id();
            let info = ChannelInfo {
                id: ChannelId(id),
                guild_id: Some(guild_id),
                name: name.to_string(),
                parent_id: Some(category_id),
            };
            self.state
                .lock()
                .unwrap()
                .channels
                .insert(id, info.clone());
            Ok(info)
        }

        async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            st.channels.remove(&channel_id.0);
            st.deleted_channels.push(channel_id.0);
            Ok(())
        }

        async fn create_webhook(
            &self,
            channel_id: ChannelId,
            name: &str,
        ) -> Result<WebhookHandle> {
            self.webhooks_created.fetch_add(1, Ordering::SeqCst);
            let id = self.alloc_id();
            let handle = WebhookHandle {
                id: WebhookId(id),
                token: format!("tok-{id}"),
            };
            self.state
                .lock()
                .unwrap()
                .webhooks
                .entry(channel_id.0)
                .or_default()
                .push(ChannelWebhook {
                    name: name.to_string(),
                    handle: handle.clone(),
                });
            Ok(handle)
        }

        async fn list_webhooks(&self, channel_id: ChannelId) -> Result<Vec<ChannelWebhook>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .webhooks
                .get(&channel_id.0)
                .cloned()
                .unwrap_or_default())
        }

        async fn execute_webhook(
            &self,
            _webhook: &WebhookHandle,
            _message: WebhookMessage,
        ) -> Result<()> {
            Ok(())
        }

        async fn send_dm(&self, _user_id: UserId, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn download_attachment(&self, _url: &str) -> Result<Vec<u8>> {
            Err(Error::External(
                "FakeChat::download_attachment not implemented for tests".to_string(),
            ))
        }
    }

    async fn service_with(chat: Arc<FakeChat>) -> Arc<RelayService> {
        let store = RelayStore::open_in_memory().await.unwrap();
        Arc::new(RelayService::new(test_config(), chat, store))
    }

    #[tokio::test]
    async fn establish_creates_channel_webhook_and_store_row() {
        let chat = Arc::new(FakeChat::new());
        let service = service_with(chat.clone()).await;

        let alice = user(1, "Alice");
        let relay = service.establish(&alice, GuildId(500)).await.unwrap();

        assert!(!relay.reused);
        assert_eq!(
            service.cache().get_channel_for_user(alice.id).await,
            Some(relay.channel_id)
        );
        let stored = service.store().get(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, relay.channel_id);
        assert_eq!(stored.webhook, relay.webhook);

        // Channel name follows the lowercased user name.
        let chan = chat.fetch_channel(relay.channel_id).await.unwrap().unwrap();
        assert_eq!(chan.name, "alice");
    }

    #[tokio::test]
    async fn establish_twice_reuses_the_same_channel() {
        let chat = Arc::new(FakeChat::new());
        let service = service_with(chat.clone()).await;

        let alice = user(1, "alice");
        let first = service.establish(&alice, GuildId(500)).await.unwrap();
        let second = service.establish(&alice, GuildId(500)).await.unwrap();

        assert_eq!(first.channel_id, second.channel_id);
        assert!(second.reused);
        assert_eq!(chat.channels_created.load(Ordering::SeqCst), 1);
        assert_eq!(service.store().list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn establish_attaches_to_existing_channel_and_discovers_webhook() {
        let chat = Arc::new(FakeChat::new());
        chat.insert_channel(77, "bob");
        chat.insert_webhook(77, WEBHOOK_NAME, 555);
        let service = service_with(chat.clone()).await;

        let relay = service.establish(&user(2, "Bob"), GuildId(500)).await.unwrap();

        assert!(relay.reused);
        assert_eq!(relay.channel_id, ChannelId(77));
        assert_eq!(relay.webhook.id, WebhookId(555));
        assert_eq!(chat.channels_created.load(Ordering::SeqCst), 0);
        assert_eq!(chat.webhooks_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn establish_creates_webhook_on_attached_channel_when_none_matches() {
        let chat = Arc::new(FakeChat::new());
        chat.insert_channel(77, "bob");
        chat.insert_webhook(77, "Some Other Hook", 556);
        let service = service_with(chat.clone()).await;

        let relay = service.establish(&user(2, "bob"), GuildId(500)).await.unwrap();

        assert_eq!(relay.channel_id, ChannelId(77));
        assert_eq!(chat.webhooks_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn establish_fails_cleanly_when_category_is_missing() {
        let chat = Arc::new(FakeChat::new());
        chat.set_category_missing(true);
        let service = service_with(chat.clone()).await;

        let err = service
            .establish(&user(3, "carol"), GuildId(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // No partial state.
        assert_eq!(service.cache().get_channel_for_user(UserId(3)).await, None);
        assert!(service.store().list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn establish_fails_cleanly_when_category_is_unconfigured() {
        let mut cfg = (*test_config()).clone();
        cfg.relay_category_id = None;
        let chat = Arc::new(FakeChat::new());
        let store = RelayStore::open_in_memory().await.unwrap();
        let service = RelayService::new(Arc::new(cfg), chat, store);

        let err = service
            .establish(&user(3, "carol"), GuildId(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn establish_replaces_mapping_when_cached_channel_vanished() {
        let chat = Arc::new(FakeChat::new());
        let service = service_with(chat.clone()).await;

        let alice = user(1, "alice");
        let first = service.establish(&alice, GuildId(500)).await.unwrap();
        // Channel deleted out-of-band; the stale mapping must be pruned and a
        // fresh channel created.
        chat.drop_channel(first.channel_id.0);

        let second = service.establish(&alice, GuildId(500)).await.unwrap();
        assert_ne!(first.channel_id, second.channel_id);
        assert_eq!(chat.channels_created.load(Ordering::SeqCst), 2);

        let stored = service.store().get(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.channel_id, second.channel_id);
    }

    #[tokio::test]
    async fn concurrent_establish_for_one_user_creates_one_channel() {
        let chat = Arc::new(FakeChat::new());
        let service = service_with(chat.clone()).await;

        let alice = user(1, "alice");
        let (a, b) = tokio::join!(
            service.establish(&alice, GuildId(500)),
            service.establish(&alice, GuildId(500))
        );

        assert_eq!(a.unwrap().channel_id, b.unwrap().channel_id);
        assert_eq!(chat.channels_created.load(Ordering::SeqCst), 1);
        assert_eq!(service.store().list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restore_populates_cache_and_prunes_missing_channels() {
        let chat = Arc::new(FakeChat::new());
        chat.insert_channel(10, "alive");
        let service = service_with(chat.clone()).await;

        let live = RelayMapping {
            user_id: UserId(1),
            channel_id: ChannelId(10),
            webhook: WebhookHandle {
                id: WebhookId(100),
                token: "tok-100".to_string(),
            },
        };
        let stale = RelayMapping {
            user_id: UserId(2),
            channel_id: ChannelId(20),
            webhook: WebhookHandle {
                id: WebhookId(200),
                token: "tok-200".to_string(),
            },
        };
        service.store().put(&live).await.unwrap();
        service.store().put(&stale).await.unwrap();

        let summary = service.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                restored: 1,
                pruned: 1
            }
        );

        assert_eq!(
            service.cache().get_channel_for_user(UserId(1)).await,
            Some(ChannelId(10))
        );
        assert_eq!(
            service.cache().get_webhook_for_channel(ChannelId(10)).await,
            Some(live.webhook)
        );
        assert_eq!(service.cache().get_channel_for_user(UserId(2)).await, None);

        let remaining = service.store().list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id, UserId(1));
    }

    #[tokio::test]
    async fn close_confirmed_removes_cache_and_store() {
        let chat = Arc::new(FakeChat::new());
        let service = service_with(chat.clone()).await;

        let alice = user(1, "alice");
        let relay = service.establish(&alice, GuildId(500)).await.unwrap();

        let closed = service.close_confirmed(alice.id).await.unwrap();
        assert_eq!(closed, Some(relay.channel_id));
        assert_eq!(service.cache().get_channel_for_user(alice.id).await, None);
        assert!(service.store().get(alice.id).await.unwrap().is_none());

        // Closing again is a no-op.
        assert_eq!(service.close_confirmed(alice.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deferred_deletion_fires_after_the_grace_delay() {
        let chat = Arc::new(FakeChat::new());
        chat.insert_channel(10, "alice");
        let service = service_with(chat.clone()).await;

        tokio::time::pause();
        service
            .schedule_channel_deletion_after(ChannelId(10), Duration::from_secs(5))
            .await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(chat.fetch_channel(ChannelId(10)).await.unwrap().is_none());
        assert_eq!(chat.state.lock().unwrap().deleted_channels, vec![10]);
    }

    #[tokio::test]
    async fn reopen_within_the_grace_window_cancels_deletion() {
        let chat = Arc::new(FakeChat::new());
        chat.insert_channel(10, "alice");
        let service = service_with(chat.clone()).await;

        tokio::time::pause();
        service
            .schedule_channel_deletion_after(ChannelId(10), Duration::from_secs(5))
            .await;
        service.cancel_pending_delete(ChannelId(10)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(chat.fetch_channel(ChannelId(10)).await.unwrap().is_some());
        assert!(chat.state.lock().unwrap().deleted_channels.is_empty());
    }
}
