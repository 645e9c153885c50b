//! Slash command entry points: `/dm`, `/dm_id`, `/close_dm`.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use dmr_core::{
    chat::{types::ChatUser, ChatPort},
    domain::UserId,
    security::is_owner,
    Result,
};

use crate::{embeds, handlers, router::AppState};

pub async fn handle_command(state: &Arc<AppState>, interaction: &Value) -> Result<()> {
    let Some((id, token)) = handlers::interaction_ids(interaction) else {
        return Ok(());
    };
    let name = interaction
        .pointer("/data/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let Some(invoker) = handlers::invoker_user(interaction) else {
        return state
            .api
            .respond_embed(&id, &token, embeds::permission_denied())
            .await;
    };
    info!(command = %name, user_id = invoker.id.0, "command received");

    if !is_owner(Some(invoker.id), state.cfg.owner_id) {
        return state
            .api
            .respond_embed(&id, &token, embeds::permission_denied())
            .await;
    }

    match name.as_str() {
        "dm" => dm_command(state, interaction, &id, &token, &invoker).await,
        "dm_id" => dm_id_command(state, interaction, &id, &token, &invoker).await,
        "close_dm" => close_dm_command(state, interaction, &id, &token).await,
        _ => Ok(()),
    }
}

/// `/dm user:<mention>` — open the message-composition form for a user.
async fn dm_command(
    state: &Arc<AppState>,
    interaction: &Value,
    id: &str,
    token: &str,
    invoker: &ChatUser,
) -> Result<()> {
    let Some(target_id) = handlers::option_snowflake(interaction, "user") else {
        return state
            .api
            .respond_text(id, token, "Couldn't find user. Please specify the user.")
            .await;
    };

    let target = match handlers::resolved_user(interaction, target_id) {
        Some(user) => Some(user),
        None => state.api.fetch_user(UserId(target_id)).await?,
    };
    let Some(target) = target else {
        return state.api.respond_text(id, token, "User not found!").await;
    };

    if target.id == invoker.id {
        return state
            .api
            .respond_text(id, token, "You can't DM yourself!")
            .await;
    }
    if target.is_bot {
        return state.api.respond_text(id, token, "You can't DM bots!").await;
    }

    state.api.respond_modal(id, token, dm_modal(target.id.0)).await
}

/// `/dm_id user_id:<raw id>` — same form, for users outside the guild.
async fn dm_id_command(
    state: &Arc<AppState>,
    interaction: &Value,
    id: &str,
    token: &str,
    invoker: &ChatUser,
) -> Result<()> {
    let parsed = handlers::option_str(interaction, "user_id")
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let Some(target_id) = parsed else {
        return state
            .api
            .respond_text(id, token, "Invalid user ID format!")
            .await;
    };

    if target_id == invoker.id.0 {
        return state
            .api
            .respond_text(id, token, "You can't DM yourself!")
            .await;
    }

    let target = match state.api.fetch_user(UserId(target_id)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!(user_id = target_id, "dm_id target not found");
            return state.api.respond_text(id, token, "User not found!").await;
        }
        Err(e) => {
            return state
                .api
                .respond_text(id, token, &format!("Error fetching user: {e}"))
                .await;
        }
    };

    if target.is_bot {
        return state.api.respond_text(id, token, "You can't DM bots!").await;
    }

    state.api.respond_modal(id, token, dm_modal(target.id.0)).await
}

/// `/close_dm [user]` — prompt the closure confirmation dialog. With no user
/// argument the target is inferred from the relay channel the command was
/// issued in.
async fn close_dm_command(
    state: &Arc<AppState>,
    interaction: &Value,
    id: &str,
    token: &str,
) -> Result<()> {
    let target_id = match handlers::option_snowflake(interaction, "user") {
        Some(uid) => Some(UserId(uid)),
        None => match handlers::interaction_channel_id(interaction) {
            Some(channel_id) => state.relays.cache().get_user_for_channel(channel_id).await,
            None => None,
        },
    };
    let Some(target_id) = target_id else {
        info!("close_dm could not infer user from channel");
        return state
            .api
            .respond_text(id, token, "Couldn't find user. Please specify the user.")
            .await;
    };

    let display_name = match handlers::resolved_user(interaction, target_id.0) {
        Some(user) => user.display_name,
        None => match state.api.fetch_user(target_id).await {
            Ok(Some(user)) => user.display_name,
            _ => target_id.0.to_string(),
        },
    };

    if state
        .relays
        .cache()
        .get_channel_for_user(target_id)
        .await
        .is_none()
    {
        return state
            .api
            .respond_embed(id, token, embeds::no_active_relay(&display_name))
            .await;
    }

    state.confirmations.open(target_id).await;
    info!(user_id = target_id.0, "closure confirmation prompted");
    state
        .api
        .respond_embed_with_components(
            id,
            token,
            embeds::confirm_closure(&display_name),
            close_buttons(target_id.0),
        )
        .await
}

fn dm_modal(target_id: u64) -> Value {
    json!({
        "custom_id": format!("dmrelay:dm:{target_id}"),
        "title": "Send DM",
        "components": [{
            "type": 1,
            "components": [{
                "type": 4,
                "custom_id": "message",
                "label": "Message",
                "style": 2,
                "placeholder": "Type your message here...",
                "required": true,
                "max_length": 2000
            }]
        }]
    })
}

fn close_buttons(user_id: u64) -> Value {
    json!([{
        "type": 1,
        "components": [
            {
                "type": 2,
                "style": 4,
                "label": "Yes",
                "custom_id": format!("dmrelay:close:{user_id}:confirm")
            },
            {
                "type": 2,
                "style": 2,
                "label": "No",
                "custom_id": format!("dmrelay:close:{user_id}:cancel")
            }
        ]
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::component::parse_close_custom_id;
    use dmr_core::confirm::Decision;

    #[test]
    fn modal_carries_the_target_in_its_custom_id() {
        let modal = dm_modal(123);
        assert_eq!(modal["custom_id"].as_str(), Some("dmrelay:dm:123"));
        let input = &modal["components"][0]["components"][0];
        assert_eq!(input["custom_id"].as_str(), Some("message"));
        assert_eq!(input["max_length"].as_u64(), Some(2000));
    }

    #[test]
    fn close_buttons_round_trip_through_the_parser() {
        let buttons = close_buttons(123);
        let row = buttons[0]["components"].as_array().unwrap();
        assert_eq!(row.len(), 2);

        let confirm = row[0]["custom_id"].as_str().unwrap();
        assert_eq!(
            parse_close_custom_id(confirm),
            Some((UserId(123), Decision::Confirm))
        );
        let cancel = row[1]["custom_id"].as_str().unwrap();
        assert_eq!(
            parse_close_custom_id(cancel),
            Some((UserId(123), Decision::Cancel))
        );
    }
}
