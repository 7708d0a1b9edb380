//! Indexed driver: one row per key, suited to larger marker sets.
//!
//! Schema is created on open. Single-key atomicity rides on SQLite's own
//! transactional writes, so there is nothing extra to do for crash safety.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::{StateStore, StoreError};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if necessary) the database at `path` and ensures the
    /// schema exists. Accepts a bare filesystem path or a full sqlite URL.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;

        debug!(url = %url, "sqlite state store opened");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS autopilot_state (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM autopilot_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO autopilot_state (key, value) VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM autopilot_state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // substr comparison instead of LIKE: marker keys contain `_`, which
        // LIKE would treat as a wildcard.
        let rows = sqlx::query(
            "SELECT key FROM autopilot_state WHERE substr(key, 1, ?1) = ?2 ORDER BY key",
        )
        .bind(prefix.len() as i64)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.get::<String, _>("key")).collect())
    }
}
