//! Confirmation dialog button presses.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use dmr_core::{
    confirm::{ConfirmOutcome, Decision},
    domain::UserId,
    security::is_owner,
    Result,
};

use crate::{embeds, handlers, router::AppState};

/// `dmrelay:close:{user_id}:{confirm|cancel}` -> target + decision.
pub(crate) fn parse_close_custom_id(custom_id: &str) -> Option<(UserId, Decision)> {
    let rest = custom_id.strip_prefix("dmrelay:close:")?;
    let (user_id, action) = rest.split_once(':')?;
    let user_id = user_id.parse().ok()?;
    let decision = match action {
        "confirm" => Decision::Confirm,
        "cancel" => Decision::Cancel,
        _ => return None,
    };
    Some((UserId(user_id), decision))
}

pub async fn handle_component(state: &Arc<AppState>, interaction: &Value) -> Result<()> {
    let Some((id, token)) = handlers::interaction_ids(interaction) else {
        return Ok(());
    };
    let custom_id = interaction
        .pointer("/data/custom_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let Some((target_id, decision)) = parse_close_custom_id(custom_id) else {
        return Ok(());
    };

    // Unauthorized presses are rejected without touching the dialog state.
    let invoker = handlers::invoker_user(interaction);
    if !is_owner(invoker.as_ref().map(|u| u.id), state.cfg.owner_id) {
        return state
            .api
            .respond_embed(&id, &token, embeds::permission_denied())
            .await;
    }
    let invoker_id = invoker.map(|u| u.id.0).unwrap_or_default();

    match state.confirmations.resolve(target_id, decision).await {
        ConfirmOutcome::Confirmed => {
            confirm_closure(state, interaction, &id, &token, target_id, invoker_id).await
        }
        ConfirmOutcome::Cancelled => {
            info!(
                user_id = target_id.0,
                by = invoker_id,
                "cancelled DM relay closure"
            );
            state
                .api
                .respond_update(&id, &token, embeds::closure_cancelled())
                .await
        }
        ConfirmOutcome::Expired | ConfirmOutcome::NotPending => {
            state
                .api
                .respond_update(&id, &token, embeds::closure_expired())
                .await
        }
    }
}

async fn confirm_closure(
    state: &Arc<AppState>,
    interaction: &Value,
    id: &str,
    token: &str,
    target_id: UserId,
    invoker_id: u64,
) -> Result<()> {
    use dmr_core::chat::ChatPort;

    let target = state.api.fetch_user(target_id).await.ok().flatten();
    let display_name = target
        .as_ref()
        .map(|u| u.display_name.clone())
        .unwrap_or_else(|| target_id.0.to_string());

    state.relays.close_confirmed(target_id).await?;
    info!(user_id = target_id.0, by = invoker_id, "closed DM relay");

    state
        .api
        .respond_update(id, token, embeds::relay_closed(&display_name))
        .await?;

    // Delete the hosting channel when the dialog lives in the user's relay
    // channel, matched by name as the channel was created from it.
    let channel_id = handlers::interaction_channel_id(interaction);
    let channel_name = handlers::interaction_channel_name(interaction);
    if let (Some(target), Some(channel_id), Some(channel_name)) =
        (target, channel_id, channel_name)
    {
        if channel_name == target.name.to_lowercase() {
            let grace_secs = state.cfg.delete_grace.as_secs();
            if let Err(e) = state
                .api
                .send_embed(channel_id, embeds::channel_deletion(grace_secs))
                .await
            {
                warn!(channel_id = channel_id.0, error = %e, "failed to announce channel deletion");
            }
            state.relays.schedule_channel_deletion(channel_id).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_confirm_and_cancel() {
        assert_eq!(
            parse_close_custom_id("dmrelay:close:42:confirm"),
            Some((UserId(42), Decision::Confirm))
        );
        assert_eq!(
            parse_close_custom_id("dmrelay:close:42:cancel"),
            Some((UserId(42), Decision::Cancel))
        );
    }

    #[test]
    fn rejects_foreign_custom_ids() {
        assert_eq!(parse_close_custom_id("dmrelay:close:42:maybe"), None);
        assert_eq!(parse_close_custom_id("dmrelay:close:nope:confirm"), None);
        assert_eq!(parse_close_custom_id("dmrelay:dm:42"), None);
        assert_eq!(parse_close_custom_id("askuser:1:2"), None);
    }
}
