use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::{ChannelId, GuildId, UserId},
    errors::Error,
    Result,
};

/// Typed configuration for the relay bridge, sourced from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub owner_id: UserId,

    // Relay placement
    pub relay_guild_id: Option<GuildId>,
    pub relay_category_id: Option<ChannelId>,

    // Storage
    pub database_path: PathBuf,

    // Forwarding limits
    pub attachment_max_bytes: u64,

    // Closure dialog
    pub confirm_timeout: Duration,
    pub delete_grace: Duration,

    // Platform endpoints
    pub api_base: String,
    pub gateway_url: String,
    pub http_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let bot_token = env_str("DISCORD_BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let owner_id = env_u64("DISCORD_OWNER_ID").map(UserId).ok_or_else(|| {
            Error::Config("DISCORD_OWNER_ID environment variable is required".to_string())
        })?;

        // Relay placement. The category is validated at establish time, not
        // here: its absence is a reported, non-fatal error.
        let relay_guild_id = env_u64("DM_GUILD_ID").map(GuildId);
        let relay_category_id = env_u64("DM_CATEGORY_ID").map(ChannelId);

        let database_path = PathBuf::from(
            env_str("DATABASE_PATH").unwrap_or("database/database.db".to_string()),
        );

        // 8 MiB mirrors the platform's upload ceiling for bot accounts.
        let attachment_max_bytes = env_u64("ATTACHMENT_MAX_BYTES").unwrap_or(8 * 1024 * 1024);

        let confirm_timeout = Duration::from_secs(env_u64("CONFIRM_TIMEOUT_SECS").unwrap_or(60));
        let delete_grace = Duration::from_secs(env_u64("DELETE_GRACE_SECS").unwrap_or(5));

        let api_base = env_str("DISCORD_API_BASE")
            .and_then(non_empty)
            .unwrap_or("https://discord.com/api/v10".to_string());
        let gateway_url = env_str("DISCORD_GATEWAY_URL")
            .and_then(non_empty)
            .unwrap_or("wss://gateway.discord.gg/?v=10&encoding=json".to_string());
        let http_timeout = Duration::from_secs(env_u64("HTTP_TIMEOUT_SECS").unwrap_or(30));

        Ok(Self {
            bot_token,
            owner_id,
            relay_guild_id,
            relay_category_id,
            database_path,
            attachment_max_bytes,
            confirm_timeout,
            delete_grace,
            api_base,
            gateway_url,
            http_timeout,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
