//! SQLite-backed token store using sqlx.
//!
//! Schema: `session_tokens(key TEXT PRIMARY KEY, value TEXT, updated_at INTEGER)`.

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;
use vesta_types::{Result, TokenKey, TokenStore};

/// A persistent [`TokenStore`] backed by `SQLite`.
pub struct SqliteTokenStore {
    pool: SqlitePool,
}

impl SqliteTokenStore {
    /// Connects to a `SQLite` database (e.g. `"sqlite:./tokens.db"` or `"sqlite::memory:"`).
    ///
    /// Automatically creates the database file if it does not exist and
    /// creates the schema.
    ///
    /// # Errors
    ///
    /// Returns a [`sqlx::Error`] if the connection or table creation fails.
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection is its own database; keep a single one.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 2 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_tokens (
                key         TEXT    PRIMARY KEY NOT NULL,
                value       TEXT    NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT (unixepoch())
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM session_tokens WHERE key = ?")
                .bind(key.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_tokens (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 updated_at = unixepoch()",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<()> {
        sqlx::query("DELETE FROM session_tokens WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let done = sqlx::query("DELETE FROM session_tokens")
            .execute(&self.pool)
            .await?;
        tracing::debug!(rows = done.rows_affected(), "cleared session tokens");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mem() -> SqliteTokenStore {
        SqliteTokenStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let s = mem().await;
        s.set(TokenKey::RefreshToken, "refresh").await.unwrap();
        assert_eq!(
            s.get(TokenKey::RefreshToken).await.unwrap().as_deref(),
            Some("refresh")
        );
    }

    #[tokio::test]
    async fn test_get_missing() {
        let s = mem().await;
        assert!(s.get(TokenKey::IdentityToken).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert() {
        let s = mem().await;
        s.set(TokenKey::AccessToken, "first").await.unwrap();
        s.set(TokenKey::AccessToken, "second").await.unwrap();
        assert_eq!(
            s.get(TokenKey::AccessToken).await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let s = mem().await;
        s.set(TokenKey::ExpiresAt, "1700000000").await.unwrap();
        s.remove(TokenKey::ExpiresAt).await.unwrap();
        assert!(s.get(TokenKey::ExpiresAt).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let s = mem().await;
        for key in TokenKey::ALL {
            s.set(key, "v").await.unwrap();
        }
        s.clear().await.unwrap();
        for key in TokenKey::ALL {
            assert!(s.get(key).await.unwrap().is_none());
        }
    }
}
