//! Inbound private messages: forward into the author's relay channel.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use dmr_core::{
    chat::types::{InboundAttachment, InboundDm},
    domain::ChannelId,
};

use crate::{router::AppState, snowflake, user_from_json};

pub async fn handle_message(state: &Arc<AppState>, data: &Value) {
    // Guild messages are not DMs.
    if data.get("guild_id").is_some() {
        return;
    }
    let Some(author) = data.get("author").and_then(user_from_json) else {
        return;
    };
    // Never echo our own (or any bot's) messages back through the relay.
    if author.is_bot || state.bot_user_id() == Some(author.id) {
        return;
    }
    let Some(channel_id) = snowflake(data, "channel_id") else {
        return;
    };

    let content = data
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let attachments = data
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(attachment_from_json).collect())
        .unwrap_or_default();

    let dm = InboundDm {
        author,
        channel_id: ChannelId(channel_id),
        content,
        attachments,
    };
    // A silent drop (no relay) is the normal case for unsolicited DMs; the
    // forwarder logs the interesting outcomes itself.
    if let Err(e) = state.forwarder.forward_inbound(&dm).await {
        error!(user_id = dm.author.id.0, error = %e, "failed to forward DM");
    }
}

fn attachment_from_json(v: &Value) -> Option<InboundAttachment> {
    Some(InboundAttachment {
        filename: v.get("filename")?.as_str()?.to_string(),
        size: v.get("size")?.as_u64()?,
        url: v.get("url")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_attachment_metadata() {
        let v = json!({
            "filename": "photo.png",
            "size": 1024,
            "url": "https://cdn.discordapp.com/attachments/1/2/photo.png"
        });
        let att = attachment_from_json(&v).unwrap();
        assert_eq!(att.filename, "photo.png");
        assert_eq!(att.size, 1024);

        assert!(attachment_from_json(&json!({ "filename": "x" })).is_none());
    }
}
