use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite, sqlite::SqlitePoolOptions};

use super::kv::{KvBatch, KvOp, KvStore, prefix_upper_bound};

/// SQLite-backed ordered key/value store
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: Pool<Sqlite>,
}

impl SqliteKvStore {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite is single-writer
            .connect(connection_string)
            .await?;

        // Initialize table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        // Range scan instead of LIKE so `_` in keys is not a wildcard
        let rows = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query("SELECT key, value FROM kv WHERE key >= ? AND key < ? ORDER BY key ASC")
                    .bind(prefix)
                    .bind(upper)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT key, value FROM kv WHERE key >= ? ORDER BY key ASC")
                    .bind(prefix)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    async fn apply(&self, batch: KvBatch) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in batch.ops {
            match op {
                KvOp::Put { key, value } => {
                    sqlx::query(
                        "INSERT INTO kv (key, value) VALUES (?, ?)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    )
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
                }
                KvOp::Delete { key } => {
                    sqlx::query("DELETE FROM kv WHERE key = ?")
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteKvStore {
        SqliteKvStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip() {
        let s = store().await;
        s.put("session:s-1", r#"{"state":"active"}"#).await.unwrap();
        assert_eq!(
            s.get("session:s-1").await.unwrap().as_deref(),
            Some(r#"{"state":"active"}"#)
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let s = store().await;
        s.put("k", "v1").await.unwrap();
        s.put("k", "v2").await.unwrap();
        assert_eq!(s.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_scan_prefix_does_not_treat_underscore_as_wildcard() {
        let s = store().await;
        s.put("change_set:1", "a").await.unwrap();
        s.put("changeXset:1", "b").await.unwrap();

        let rows = s.scan_prefix("change_set:").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "change_set:1");
    }

    #[tokio::test]
    async fn test_batch_is_transactional() {
        let s = store().await;
        let batch = KvBatch::new().put("a", "1").put("b", "2");
        s.apply(batch).await.unwrap();
        assert!(s.get("a").await.unwrap().is_some());
        assert!(s.get("b").await.unwrap().is_some());
    }
}
