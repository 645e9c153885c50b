//! DM composition modal submit: deliver, establish, mirror.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use dmr_core::{
    chat::{types::ChatUser, ChatPort},
    domain::UserId,
    errors::Error,
    security::is_owner,
    Result,
};

use crate::{embeds, handlers, router::AppState};

/// `dmrelay:dm:{user_id}` -> target.
fn parse_dm_custom_id(custom_id: &str) -> Option<UserId> {
    let rest = custom_id.strip_prefix("dmrelay:dm:")?;
    rest.parse().ok().map(UserId)
}

pub async fn handle_modal_submit(state: &Arc<AppState>, interaction: &Value) -> Result<()> {
    let Some((id, token)) = handlers::interaction_ids(interaction) else {
        return Ok(());
    };
    let custom_id = interaction
        .pointer("/data/custom_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let Some(target_id) = parse_dm_custom_id(custom_id) else {
        return Ok(());
    };

    let Some(invoker) = handlers::invoker_user(interaction) else {
        return state
            .api
            .respond_embed(&id, &token, embeds::permission_denied())
            .await;
    };
    if !is_owner(Some(invoker.id), state.cfg.owner_id) {
        return state
            .api
            .respond_embed(&id, &token, embeds::permission_denied())
            .await;
    }

    let Some(text) = handlers::modal_field(interaction, "message") else {
        return Ok(());
    };

    let target = match state.api.fetch_user(target_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return state.api.respond_text(&id, &token, "User not found!").await,
        Err(e) => {
            return state
                .api
                .respond_text(&id, &token, &format!("Error fetching user: {e}"))
                .await;
        }
    };

    // Deliver the DM first; a failed delivery ends the flow with a report and
    // creates no relay state.
    if let Err(e) = state.forwarder.send_owner_dm(&target, &text).await {
        warn!(user_id = target.id.0, error = %e, "failed to send DM");
        let message = match e {
            Error::Delivery(_) => format!(
                "Couldn't send DM to {}. They might have DMs disabled.",
                target.display_name
            ),
            other => format!("Error sending message: {other}"),
        };
        return state.api.respond_text(&id, &token, &message).await;
    }
    info!(
        target = target.id.0,
        by = invoker.id.0,
        "sent initial DM"
    );
    state
        .api
        .respond_embed(&id, &token, embeds::message_sent(&target.display_name))
        .await?;

    if let Err(e) = ensure_and_mirror(state, interaction, &invoker, &target, &text).await {
        report_establish_failure(state, &token, &e).await;
    }
    Ok(())
}

/// Ensure the relay exists for `target`, announce newly created channels, and
/// mirror the owner's message through the relay webhook.
async fn ensure_and_mirror(
    state: &Arc<AppState>,
    interaction: &Value,
    owner: &ChatUser,
    target: &ChatUser,
    text: &str,
) -> Result<()> {
    let guild_id = state
        .cfg
        .relay_guild_id
        .or_else(|| handlers::interaction_guild_id(interaction))
        .ok_or_else(|| {
            Error::NotFound("no guild available for the relay channel".to_string())
        })?;
    info!(
        guild_id = guild_id.0,
        user_id = target.id.0,
        "using guild for relay channel"
    );

    let relay = state.relays.establish(target, guild_id).await?;
    if !relay.reused {
        state
            .api
            .send_embed(
                relay.channel_id,
                embeds::relay_started(&target.display_name, target.id.0),
            )
            .await?;
    }
    state
        .forwarder
        .mirror_owner_message(&relay, owner, text)
        .await
}

async fn report_establish_failure(state: &Arc<AppState>, token: &str, err: &Error) {
    error!(error = %err, "relay establish failed");
    let Some(application_id) = state.application_id() else {
        return;
    };

    let result = match err {
        Error::NotFound(_) if state.cfg.relay_category_id.is_none() => {
            state
                .api
                .followup_embed(application_id, token, embeds::category_not_configured())
                .await
        }
        Error::NotFound(detail) => {
            state
                .api
                .followup_embed(application_id, token, embeds::category_not_found(detail))
                .await
        }
        other => {
            state
                .api
                .followup_text(
                    application_id,
                    token,
                    &format!("Error sending message: {other}"),
                )
                .await
        }
    };
    if let Err(e) = result {
        error!(error = %e, "failed to report relay failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_dm_custom_id() {
        assert_eq!(parse_dm_custom_id("dmrelay:dm:123"), Some(UserId(123)));
        assert_eq!(parse_dm_custom_id("dmrelay:dm:"), None);
        assert_eq!(parse_dm_custom_id("dmrelay:close:123:confirm"), None);
    }
}
