use std::sync::Arc;

use dmr_core::{
    chat::ChatPort, config::Config, confirm::ConfirmRegistry, forward::Forwarder,
    relay::RelayService, store::RelayStore,
};
use dmr_discord::{gateway, router::AppState, DiscordApi};

#[tokio::main]
async fn main() -> Result<(), dmr_core::Error> {
    dmr_core::logging::init("dmr")?;

    let cfg = Arc::new(Config::load()?);
    let store = RelayStore::open(&cfg.database_path).await?;

    let api = Arc::new(DiscordApi::from_config(&cfg));
    let chat: Arc<dyn ChatPort> = api.clone();
    let relays = Arc::new(RelayService::new(cfg.clone(), chat.clone(), store));
    let forwarder = Arc::new(Forwarder::new(cfg.clone(), chat, relays.clone()));
    let confirmations = Arc::new(ConfirmRegistry::new(cfg.confirm_timeout));

    let state = Arc::new(AppState::new(cfg, api, relays, forwarder, confirmations));

    gateway::run(state)
        .await
        .map_err(|e| dmr_core::Error::External(format!("gateway failed: {e}")))?;

    Ok(())
}
