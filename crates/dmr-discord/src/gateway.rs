//! Minimal gateway client.
//!
//! Connects, identifies, heartbeats, and feeds dispatch events into the
//! router. On socket loss the session is abandoned and a fresh identify is
//! performed after a short delay; relay state needs no gateway resume since
//! the store is the source of truth.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::router::{self, AppState};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// Guilds, direct messages, message content.
const INTENTS: u64 = (1 << 0) | (1 << 12) | (1 << 15);

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

#[derive(Debug, Deserialize)]
struct Frame {
    op: u64,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
    #[serde(default)]
    d: Value,
}

/// Run the gateway loop forever, reconnecting on socket loss.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    loop {
        match connect_once(&state).await {
            Ok(()) => info!("gateway session ended, reconnecting"),
            Err(e) => warn!(error = %e, "gateway connection failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": token,
            "intents": INTENTS,
            "properties": { "os": "linux", "browser": "dmr", "device": "dmr" }
        }
    })
}

fn heartbeat_payload(seq: Option<u64>) -> Value {
    json!({ "op": OP_HEARTBEAT, "d": seq })
}

async fn connect_once(state: &Arc<AppState>) -> anyhow::Result<()> {
    let (ws, _) = connect_async(state.cfg.gateway_url.as_str()).await?;
    let (mut sink, mut stream) = ws.split();

    // The first frame must be HELLO carrying the heartbeat interval.
    let hello = loop {
        let Some(msg) = stream.next().await else {
            anyhow::bail!("gateway closed before hello");
        };
        if let Message::Text(text) = msg? {
            break serde_json::from_str::<Frame>(&text)?;
        }
    };
    if hello.op != OP_HELLO {
        anyhow::bail!("expected hello, got op {}", hello.op);
    }
    let interval_ms = hello
        .d
        .get("heartbeat_interval")
        .and_then(Value::as_u64)
        .unwrap_or(41_250);

    sink.send(Message::Text(
        identify_payload(&state.cfg.bot_token).to_string(),
    ))
    .await?;
    info!("gateway identified");

    let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq: Option<u64> = None;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                sink.send(Message::Text(heartbeat_payload(seq).to_string())).await?;
            }
            msg = stream.next() => {
                let Some(msg) = msg else { return Ok(()) };
                let msg = msg?;
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(()),
                    _ => continue,
                };
                let frame: Frame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "unparsable gateway frame");
                        continue;
                    }
                };

                match frame.op {
                    OP_DISPATCH => {
                        if frame.s.is_some() {
                            seq = frame.s;
                        }
                        if let Some(kind) = frame.t {
                            // Handlers run detached so a slow forward cannot
                            // starve the heartbeat.
                            let state = Arc::clone(state);
                            tokio::spawn(router::dispatch_event(state, kind, frame.d));
                        }
                    }
                    OP_HEARTBEAT => {
                        sink.send(Message::Text(heartbeat_payload(seq).to_string())).await?;
                    }
                    OP_RECONNECT | OP_INVALID_SESSION => {
                        info!(op = frame.op, "gateway requested reconnect");
                        return Ok(());
                    }
                    OP_HEARTBEAT_ACK => {}
                    other => {
                        warn!(op = other, "unhandled gateway opcode");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_carries_token_and_intents() {
        let payload = identify_payload("secret");
        assert_eq!(payload["op"].as_u64(), Some(OP_IDENTIFY));
        assert_eq!(payload["d"]["token"].as_str(), Some("secret"));
        // Guilds + direct messages + message content.
        assert_eq!(payload["d"]["intents"].as_u64(), Some(36865));
    }

    #[test]
    fn heartbeat_echoes_the_last_sequence() {
        assert!(heartbeat_payload(None)["d"].is_null());
        assert_eq!(heartbeat_payload(Some(12))["d"].as_u64(), Some(12));
    }
}
