//! Interaction and message handlers.

pub mod commands;
pub mod component;
pub mod dm_message;
pub mod modal;

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use dmr_core::{
    chat::types::ChatUser,
    domain::{ChannelId, GuildId},
};

use crate::{router::AppState, snowflake, user_from_json};

const INTERACTION_APPLICATION_COMMAND: u64 = 2;
const INTERACTION_MESSAGE_COMPONENT: u64 = 3;
const INTERACTION_MODAL_SUBMIT: u64 = 5;

pub async fn handle_interaction(state: &Arc<AppState>, interaction: &Value) {
    let kind = interaction.get("type").and_then(Value::as_u64).unwrap_or(0);
    let result = match kind {
        INTERACTION_APPLICATION_COMMAND => commands::handle_command(state, interaction).await,
        INTERACTION_MESSAGE_COMPONENT => component::handle_component(state, interaction).await,
        INTERACTION_MODAL_SUBMIT => modal::handle_modal_submit(state, interaction).await,
        _ => Ok(()),
    };
    if let Err(e) = result {
        error!(error = %e, "interaction handling failed");
    }
}

// ---- Payload accessors shared by the handlers -----------------------------

/// Interaction id + token, both required to respond.
pub(crate) fn interaction_ids(interaction: &Value) -> Option<(String, String)> {
    let id = interaction.get("id")?.as_str()?.to_string();
    let token = interaction.get("token")?.as_str()?.to_string();
    Some((id, token))
}

/// The pressing/invoking user: `member.user` in guilds, `user` in DMs.
pub(crate) fn invoker_user(interaction: &Value) -> Option<ChatUser> {
    let user = interaction
        .pointer("/member/user")
        .or_else(|| interaction.get("user"))?;
    user_from_json(user)
}

pub(crate) fn interaction_channel_id(interaction: &Value) -> Option<ChannelId> {
    snowflake(interaction, "channel_id").map(ChannelId)
}

pub(crate) fn interaction_channel_name(interaction: &Value) -> Option<&str> {
    interaction.pointer("/channel/name").and_then(Value::as_str)
}

pub(crate) fn interaction_guild_id(interaction: &Value) -> Option<GuildId> {
    snowflake(interaction, "guild_id").map(GuildId)
}

/// Raw value of a named command option.
pub(crate) fn option_value<'a>(interaction: &'a Value, name: &str) -> Option<&'a Value> {
    interaction
        .pointer("/data/options")?
        .as_array()?
        .iter()
        .find(|opt| opt.get("name").and_then(Value::as_str) == Some(name))?
        .get("value")
}

/// Snowflake-valued option (user mentions arrive as string-encoded ids).
pub(crate) fn option_snowflake(interaction: &Value, name: &str) -> Option<u64> {
    option_value(interaction, name)?.as_str()?.parse().ok()
}

pub(crate) fn option_str<'a>(interaction: &'a Value, name: &str) -> Option<&'a str> {
    option_value(interaction, name)?.as_str()
}

/// User object resolved by the platform alongside a user option.
pub(crate) fn resolved_user(interaction: &Value, user_id: u64) -> Option<ChatUser> {
    let user = interaction.pointer(&format!("/data/resolved/users/{user_id}"))?;
    user_from_json(user)
}

/// Value of a text input in a submitted modal.
pub(crate) fn modal_field(interaction: &Value, custom_id: &str) -> Option<String> {
    let rows = interaction.pointer("/data/components")?.as_array()?;
    for row in rows {
        let Some(inputs) = row.get("components").and_then(Value::as_array) else {
            continue;
        };
        for input in inputs {
            if input.get("custom_id").and_then(Value::as_str) == Some(custom_id) {
                return input
                    .get("value")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
    }
    None
}
