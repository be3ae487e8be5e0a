//! Embedded-db adapter, backed by SQLite via `sqlx`.
//!
//! A pool-construction pattern (`SqlitePoolOptions::new().max_connections(..)
//! .connect(..)`) and runtime (non-macro) queries throughout, since there is
//! no `DATABASE_URL` available to `cargo sqlx prepare` at build time for
//! this workspace.

use crate::{Options, StorageAdapter, StorageError};
use async_trait::async_trait;
use kvb_protocol::{now_millis, DeleteResult, QueryResultRow, Scalar, SetResult, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

pub struct SqliteAdapter {
    pool: SqlitePool,
}

impl SqliteAdapter {
    /// `database_url` is a `sqlite:` connection string, e.g.
    /// `sqlite://./data/kvbroker.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let adapter = Self { pool };
        adapter.run_migrations().await?;
        Ok(adapter)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS kv_store (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, key)
            )"#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    async fn get(
        &self,
        collection: &str,
        key: &str,
        _options: &Options,
    ) -> Result<Option<Value>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("value").map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        _options: &Options,
    ) -> Result<SetResult, StorageError> {
        let raw = serde_json::to_string(&value)?;
        let timestamp = now_millis();
        sqlx::query(
            r#"INSERT INTO kv_store (collection, key, value, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(collection)
        .bind(key)
        .bind(raw)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(SetResult {
            success: true,
            key: key.to_owned(),
            timestamp,
        })
    }

    async fn delete(
        &self,
        collection: &str,
        key: &str,
        _options: &Options,
    ) -> Result<DeleteResult, StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(DeleteResult {
            deleted: key.to_owned(),
        })
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &BTreeMap<String, Scalar>,
        _options: &Options,
    ) -> Result<Vec<QueryResultRow>, StorageError> {
        // Last-modified-descending — the other adapter-declared order the
        // spec explicitly allows (insertion order for memory/file-tree,
        // recency for the embedded store).
        let rows = sqlx::query(
            "SELECT key, value FROM kv_store WHERE collection = ? ORDER BY updated_at DESC",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(|e| StorageError::Backend(e.to_string()))?;
            let raw: String = row.try_get("value").map_err(|e| StorageError::Backend(e.to_string()))?;
            let value: Value = serde_json::from_str(&raw)?;
            if crate::matches_predicate(&value, predicate) {
                results.push(QueryResultRow {
                    key,
                    fields: crate::document_fields(&value),
                });
            }
        }
        Ok(results)
    }
}
