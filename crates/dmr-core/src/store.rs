//! Durable persistence of relay mappings.
//!
//! A single `dm_relays` table is the source of truth; the in-memory cache is
//! rebuilt from it at startup. All identifiers are stored as text
//! representations of the platform's 64-bit ids.

use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use tracing::{info, warn};

use crate::{
    chat::types::WebhookHandle,
    domain::{ChannelId, UserId, WebhookId},
    Result,
};

/// One durable relay record: user -> channel + webhook credentials.
///
/// Mutated only by replacement; webhook recreation rewrites the whole row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayMapping {
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub webhook: WebhookHandle,
}

#[derive(Debug, FromRow)]
struct RelayRow {
    user_id: String,
    channel_id: String,
    webhook_id: String,
    webhook_token: String,
}

impl RelayRow {
    fn into_mapping(self) -> Option<RelayMapping> {
        Some(RelayMapping {
            user_id: UserId(self.user_id.parse().ok()?),
            channel_id: ChannelId(self.channel_id.parse().ok()?),
            webhook: WebhookHandle {
                id: WebhookId(self.webhook_id.parse().ok()?),
                token: self.webhook_token,
            },
        })
    }
}

const MIGRATION: &str = "CREATE TABLE IF NOT EXISTS dm_relays (
    user_id       TEXT PRIMARY KEY,
    channel_id    TEXT NOT NULL,
    webhook_id    TEXT NOT NULL,
    webhook_token TEXT NOT NULL
)";

/// SQLite-backed store for relay mappings.
#[derive(Clone)]
pub struct RelayStore {
    pool: SqlitePool,
}

impl RelayStore {
    /// Open (creating if missing) the database at `db_path` and run the
    /// migration.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("connected to relay database at {}", db_path.display());

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database; used by tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection keeps every statement on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION).execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert by user id; idempotent, last write wins.
    pub async fn put(&self, mapping: &RelayMapping) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO dm_relays (user_id, channel_id, webhook_id, webhook_token) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(mapping.user_id.0.to_string())
        .bind(mapping.channel_id.0.to_string())
        .bind(mapping.webhook.id.0.to_string())
        .bind(&mapping.webhook.token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes the record if present; absent is not an error.
    pub async fn delete(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM dm_relays WHERE user_id = ?")
            .bind(user_id.0.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: UserId) -> Result<Option<RelayMapping>> {
        let row = sqlx::query_as::<_, RelayRow>(
            "SELECT user_id, channel_id, webhook_id, webhook_token FROM dm_relays \
             WHERE user_id = ?",
        )
        .bind(user_id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(RelayRow::into_mapping))
    }

    /// Full set of mappings for restore; no ordering guarantee. Rows with
    /// unparsable ids are skipped with a warning.
    pub async fn list_all(&self) -> Result<Vec<RelayMapping>> {
        let rows = sqlx::query_as::<_, RelayRow>(
            "SELECT user_id, channel_id, webhook_id, webhook_token FROM dm_relays",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let user_id = row.user_id.clone();
            match row.into_mapping() {
                Some(mapping) => out.push(mapping),
                None => warn!(user_id = %user_id, "skipping dm_relays row with unparsable ids"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(user: u64, channel: u64) -> RelayMapping {
        RelayMapping {
            user_id: UserId(user),
            channel_id: ChannelId(channel),
            webhook: WebhookHandle {
                id: WebhookId(channel + 1),
                token: format!("token-{channel}"),
            },
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = RelayStore::open_in_memory().await.unwrap();
        let m = mapping(1, 100);
        store.put(&m).await.unwrap();

        assert_eq!(store.get(UserId(1)).await.unwrap(), Some(m));
        assert_eq!(store.get(UserId(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_replaces_existing_record() {
        let store = RelayStore::open_in_memory().await.unwrap();
        store.put(&mapping(1, 100)).await.unwrap();
        store.put(&mapping(1, 200)).await.unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].channel_id, ChannelId(200));
    }

    #[tokio::test]
    async fn delete_is_a_noop_when_absent() {
        let store = RelayStore::open_in_memory().await.unwrap();
        store.delete(UserId(99)).await.unwrap();

        store.put(&mapping(1, 100)).await.unwrap();
        store.delete(UserId(1)).await.unwrap();
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_returns_every_mapping() {
        let store = RelayStore::open_in_memory().await.unwrap();
        store.put(&mapping(1, 100)).await.unwrap();
        store.put(&mapping(2, 200)).await.unwrap();
        store.put(&mapping(3, 300)).await.unwrap();

        let mut users: Vec<u64> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.user_id.0)
            .collect();
        users.sort_unstable();
        assert_eq!(users, vec![1, 2, 3]);
    }
}
