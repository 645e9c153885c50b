//! Embed payloads for command responses and relay-channel notices.

use serde_json::{json, Value};

pub const COLOR_DANGER: u32 = 0xE02B2B;
pub const COLOR_SUCCESS: u32 = 0x00FF00;
pub const COLOR_ACCENT: u32 = 0x7289DA;

const AUTHOR_NAME: &str = "Owner";
const AUTHOR_ICON: &str = "https://yes.nighty.works/raw/zReOib.webp";

fn base(title: &str, description: &str, color: u32) -> Value {
    json!({
        "title": title,
        "description": description,
        "color": color,
        "author": { "name": AUTHOR_NAME, "icon_url": AUTHOR_ICON },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

pub fn permission_denied() -> Value {
    base(
        "Permission Denied",
        "You are not the owner of this bot!",
        COLOR_DANGER,
    )
}

pub fn message_sent(display_name: &str) -> Value {
    base(
        "Message Sent",
        &format!("Message sent to {display_name}!"),
        COLOR_SUCCESS,
    )
}

pub fn relay_started(display_name: &str, user_id: u64) -> Value {
    base(
        "DM Relay Started",
        &format!(
            "DM relay has been established with {display_name}\n\
             Use `/dm user:<@{user_id}>` to send messages!"
        ),
        COLOR_ACCENT,
    )
}

pub fn confirm_closure(display_name: &str) -> Value {
    base(
        "Confirm DM Relay Closure",
        &format!("Do you really want to delete the DM relay with {display_name}?"),
        COLOR_DANGER,
    )
}

pub fn relay_closed(display_name: &str) -> Value {
    base(
        "DM Relay Closed",
        &format!("Successfully closed DM relay with {display_name}"),
        COLOR_SUCCESS,
    )
}

pub fn closure_cancelled() -> Value {
    base("Cancelled", "DM relay closure cancelled", COLOR_ACCENT)
}

pub fn closure_expired() -> Value {
    base(
        "Confirmation Expired",
        "This confirmation is no longer active",
        COLOR_ACCENT,
    )
}

pub fn no_active_relay(display_name: &str) -> Value {
    base(
        "No Active Relay",
        &format!("No active DM relay with {display_name}"),
        COLOR_DANGER,
    )
}

pub fn category_not_configured() -> Value {
    base(
        "Category Not Configured",
        "DM_CATEGORY_ID is not set in the environment.",
        COLOR_DANGER,
    )
}

pub fn category_not_found(detail: &str) -> Value {
    base(
        "Category Not Found",
        &format!("{detail}. Check DM_GUILD_ID/DM_CATEGORY_ID."),
        COLOR_DANGER,
    )
}

pub fn channel_deletion(grace_secs: u64) -> Value {
    base(
        "Channel Deletion",
        &format!("Deleting this channel in {grace_secs} seconds..."),
        COLOR_DANGER,
    )
}
