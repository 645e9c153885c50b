//! App state and top-level gateway event dispatch.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use serde_json::Value;
use tracing::{error, info};

use dmr_core::{
    config::Config, confirm::ConfirmRegistry, domain::UserId, forward::Forwarder,
    relay::RelayService,
};

use crate::{handlers, snowflake, DiscordApi};

pub struct AppState {
    pub cfg: Arc<Config>,
    pub api: Arc<DiscordApi>,
    pub relays: Arc<RelayService>,
    pub forwarder: Arc<Forwarder>,
    pub confirmations: Arc<ConfirmRegistry>,
    bot_user_id: AtomicU64,
    application_id: AtomicU64,
    restored: AtomicBool,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        api: Arc<DiscordApi>,
        relays: Arc<RelayService>,
        forwarder: Arc<Forwarder>,
        confirmations: Arc<ConfirmRegistry>,
    ) -> Self {
        Self {
            cfg,
            api,
            relays,
            forwarder,
            confirmations,
            bot_user_id: AtomicU64::new(0),
            application_id: AtomicU64::new(0),
            restored: AtomicBool::new(false),
        }
    }

    /// Our own user id, known once READY arrived.
    pub fn bot_user_id(&self) -> Option<UserId> {
        match self.bot_user_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(UserId(id)),
        }
    }

    /// Application id for interaction follow-ups, known once READY arrived.
    pub fn application_id(&self) -> Option<u64> {
        match self.application_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }
}

pub async fn dispatch_event(state: Arc<AppState>, kind: String, data: Value) {
    match kind.as_str() {
        "READY" => on_ready(&state, &data).await,
        "MESSAGE_CREATE" => handlers::dm_message::handle_message(&state, &data).await,
        "INTERACTION_CREATE" => handlers::handle_interaction(&state, &data).await,
        _ => {}
    }
}

async fn on_ready(state: &Arc<AppState>, data: &Value) {
    if let Some(user) = data.get("user") {
        if let Some(id) = snowflake(user, "id") {
            state.bot_user_id.store(id, Ordering::SeqCst);
        }
        let username = user
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(username, "connected to gateway");
    }
    if let Some(id) = data.get("application").and_then(|app| snowflake(app, "id")) {
        state.application_id.store(id, Ordering::SeqCst);
    }

    // Restore once per process; gateway reconnects must not re-run it.
    if !state.restored.swap(true, Ordering::SeqCst) {
        match state.relays.restore().await {
            Ok(summary) => {
                let active = state.relays.cache().active_count().await;
                info!(
                    restored = summary.restored,
                    pruned = summary.pruned,
                    active = active,
                    "relay mappings restored"
                )
            }
            Err(e) => error!(error = %e, "relay restore failed"),
        }
    }
}
