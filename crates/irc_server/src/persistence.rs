//! Persistence bridge (C7): channels flagged `+P` survive a restart. The
//! store is an injected collaborator so the core channel logic never talks
//! SQL directly.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A flat snapshot of everything needed to rebuild a `Channel` on load,
/// independent of the in-memory `ChannelInner` layout.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub name: String,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub topic_set_at: Option<i64>,
    pub key: Option<String>,
    pub user_limit: Option<u32>,
    pub mode_letters: String,
    pub ban_masks: String,
    pub except_masks: String,
    pub invite_masks: String,
}

/// Storage for channels flagged `+P` (persistent). `NullChannelStore` is the
/// default for servers run without a database configured; `SqlChannelStore`
/// backs it with sqlite.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, PersistenceError>;
    async fn save(&self, snapshot: &ChannelSnapshot) -> Result<(), PersistenceError>;
    async fn delete(&self, name: &str) -> Result<(), PersistenceError>;
}

pub struct SqlChannelStore {
    pool: SqlitePool,
}

impl SqlChannelStore {
    pub async fn connect(database_url: &str) -> Result<Self, PersistenceError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                name TEXT PRIMARY KEY,
                topic TEXT,
                topic_set_by TEXT,
                topic_set_at INTEGER,
                key TEXT,
                user_limit INTEGER,
                mode_letters TEXT NOT NULL DEFAULT '',
                ban_masks TEXT NOT NULL DEFAULT '',
                except_masks TEXT NOT NULL DEFAULT '',
                invite_masks TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(SqlChannelStore { pool })
    }
}

#[async_trait]
impl ChannelStore for SqlChannelStore {
    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, PersistenceError> {
        let rows: Vec<(
            String,
            Option<String>,
            Option<String>,
            Option<i64>,
            Option<String>,
            Option<i64>,
            String,
            String,
            String,
            String,
        )> = sqlx::query_as(
            r#"
            SELECT name, topic, topic_set_by, topic_set_at, key, user_limit,
                   mode_letters, ban_masks, except_masks, invite_masks
            FROM channels
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    name,
                    topic,
                    topic_set_by,
                    topic_set_at,
                    key,
                    user_limit,
                    mode_letters,
                    ban_masks,
                    except_masks,
                    invite_masks,
                )| ChannelSnapshot {
                    name,
                    topic,
                    topic_set_by,
                    topic_set_at,
                    key,
                    user_limit: user_limit.map(|n| n as u32),
                    mode_letters,
                    ban_masks,
                    except_masks,
                    invite_masks,
                },
            )
            .collect())
    }

    async fn save(&self, snapshot: &ChannelSnapshot) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO channels
                (name, topic, topic_set_by, topic_set_at, key, user_limit,
                 mode_letters, ban_masks, except_masks, invite_masks)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                topic = excluded.topic,
                topic_set_by = excluded.topic_set_by,
                topic_set_at = excluded.topic_set_at,
                key = excluded.key,
                user_limit = excluded.user_limit,
                mode_letters = excluded.mode_letters,
                ban_masks = excluded.ban_masks,
                except_masks = excluded.except_masks,
                invite_masks = excluded.invite_masks
            "#,
        )
        .bind(&snapshot.name)
        .bind(&snapshot.topic)
        .bind(&snapshot.topic_set_by)
        .bind(snapshot.topic_set_at)
        .bind(&snapshot.key)
        .bind(snapshot.user_limit.map(|n| n as i64))
        .bind(&snapshot.mode_letters)
        .bind(&snapshot.ban_masks)
        .bind(&snapshot.except_masks)
        .bind(&snapshot.invite_masks)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM channels WHERE name = ? COLLATE NOCASE")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// No-op store for servers run without a configured database: persistent
/// channels simply don't survive a restart.
#[derive(Debug, Default)]
pub struct NullChannelStore;

#[async_trait]
impl ChannelStore for NullChannelStore {
    async fn load_all(&self) -> Result<Vec<ChannelSnapshot>, PersistenceError> {
        Ok(Vec::new())
    }

    async fn save(&self, _snapshot: &ChannelSnapshot) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn delete(&self, _name: &str) -> Result<(), PersistenceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_store_load_all_is_empty() {
        let store = NullChannelStore;
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn null_store_save_and_delete_are_noops() {
        let store = NullChannelStore;
        let snapshot = ChannelSnapshot {
            name: "#test".to_string(),
            topic: None,
            topic_set_by: None,
            topic_set_at: None,
            key: None,
            user_limit: None,
            mode_letters: String::new(),
            ban_masks: String::new(),
            except_masks: String::new(),
            invite_masks: String::new(),
        };
        store.save(&snapshot).await.unwrap();
        store.delete("#test").await.unwrap();
    }

    #[tokio::test]
    async fn sql_store_round_trips_a_snapshot() {
        let store = SqlChannelStore::connect("sqlite::memory:").await.unwrap();
        let snapshot = ChannelSnapshot {
            name: "#rust".to_string(),
            topic: Some("welcome".to_string()),
            topic_set_by: Some("alice".to_string()),
            topic_set_at: Some(1_700_000_000),
            key: Some("secret".to_string()),
            user_limit: Some(50),
            mode_letters: "ntP".to_string(),
            ban_masks: "*!*@bad.example".to_string(),
            except_masks: String::new(),
            invite_masks: String::new(),
        };
        store.save(&snapshot).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "#rust");
        assert_eq!(loaded[0].topic.as_deref(), Some("welcome"));
        assert_eq!(loaded[0].user_limit, Some(50));
    }
}
