use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unknown role '{0}' in history")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = HistoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            other => Err(HistoryError::UnknownRole(other.to_string())),
        }
    }
}

/// One stored message. `position` is the store-assigned sequence number and
/// is the only reliable chronological key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub position: i64,
}

impl ConversationTurn {
    pub fn new(role: TurnRole, content: impl Into<String>, position: i64) -> Self {
        Self {
            role,
            content: content.into(),
            position,
        }
    }
}

/// Append-only conversation log keyed by identity.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn open(db_path: &Path) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), HistoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_user_id ON chat_history(user_id, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a turn and returns its position.
    pub async fn append(
        &self,
        identity: &str,
        role: TurnRole,
        content: &str,
    ) -> Result<i64, HistoryError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO chat_history (user_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(identity)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The last `limit` turns of `identity`, oldest first.
    pub async fn recent(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, role, content FROM chat_history WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(identity)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = rows
            .into_iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(ConversationTurn {
                    role: role.parse()?,
                    content: row.get("content"),
                    position: row.get("id"),
                })
            })
            .collect::<Result<Vec<_>, HistoryError>>()?;
        turns.reverse();
        Ok(turns)
    }

    pub async fn clear(&self, identity: &str) -> Result<u64, HistoryError> {
        let result = sqlx::query("DELETE FROM chat_history WHERE user_id = ?")
            .bind(identity)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_returns_last_turns_in_order() {
        let store = HistoryStore::in_memory().await.expect("store");
        for i in 0..6 {
            store.append("u1", TurnRole::User, &format!("q{}", i)).await.expect("append");
            store
                .append("u1", TurnRole::Assistant, &format!("a{}", i))
                .await
                .expect("append");
        }
        store.append("u2", TurnRole::User, "other").await.expect("append");

        let turns = store.recent("u1", 3).await.expect("recent");
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["a4", "q5", "a5"]);
        assert!(turns.windows(2).all(|w| w[0].position < w[1].position));
        assert_eq!(turns[1].role, TurnRole::User);
    }

    #[tokio::test]
    async fn identities_are_isolated_and_clearable() {
        let store = HistoryStore::in_memory().await.expect("store");
        store.append("u1", TurnRole::User, "hello").await.expect("append");
        store.append("u2", TurnRole::User, "hi").await.expect("append");

        assert_eq!(store.clear("u1").await.expect("clear"), 1);
        assert!(store.recent("u1", 5).await.expect("recent").is_empty());
        assert_eq!(store.recent("u2", 5).await.expect("recent").len(), 1);
        assert!(store.recent("u2", 0).await.expect("recent").is_empty());
    }

    #[tokio::test]
    async fn history_persists_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("chat_history.db");
        {
            let store = HistoryStore::open(&db_path).await.expect("open");
            store.append("u1", TurnRole::User, "remember me").await.expect("append");
            store.close().await;
        }
        let store = HistoryStore::open(&db_path).await.expect("reopen");
        let turns = store.recent("u1", 5).await.expect("recent");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "remember me");
    }
}
