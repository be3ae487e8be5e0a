//! File-tree adapter — one JSON file per `(collection, key)`.
//!
//! Layout: `<dataDir>/<collection>_<key>.json`, pretty-printed. The data
//! directory is created once, eagerly, at construction.

use crate::{document_fields, matches_predicate, Options, StorageAdapter, StorageError};
use async_trait::async_trait;
use kvb_protocol::{now_millis, DeleteResult, QueryResultRow, Scalar, SetResult, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct FileTreeAdapter {
    data_dir: PathBuf,
}

impl FileTreeAdapter {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(Self { data_dir })
    }

    fn file_path(&self, collection: &str, key: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}_{key}.json"))
    }

    fn prefix_for(collection: &str) -> String {
        format!("{collection}_")
    }

    /// Recovers the key from a file name, given the collection prefix.
    fn key_from_file_name(file_name: &str, prefix: &str) -> Option<String> {
        file_name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .map(ToOwned::to_owned)
    }
}

#[async_trait]
impl StorageAdapter for FileTreeAdapter {
    async fn get(
        &self,
        collection: &str,
        key: &str,
        _options: &Options,
    ) -> Result<Option<Value>, StorageError> {
        let path = self.file_path(collection, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice::<Value>(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        _options: &Options,
    ) -> Result<SetResult, StorageError> {
        let path = self.file_path(collection, key);
        let pretty = serde_json::to_vec_pretty(&value)?;
        tokio::fs::write(&path, pretty).await?;
        Ok(SetResult {
            success: true,
            key: key.to_owned(),
            timestamp: now_millis(),
        })
    }

    async fn delete(
        &self,
        collection: &str,
        key: &str,
        _options: &Options,
    ) -> Result<DeleteResult, StorageError> {
        let path = self.file_path(collection, key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
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
        let prefix = Self::prefix_for(collection);
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(key) = Self::key_from_file_name(file_name, &prefix) {
                entries.push(key);
            }
        }
        // Stable, adapter-declared order: lexicographic by key.
        entries.sort();

        let mut rows = Vec::with_capacity(entries.len());
        for key in entries {
            let path = self.file_path(collection, &key);
            let bytes = tokio::fs::read(&path).await?;
            let value: Value = serde_json::from_slice(&bytes)?;
            if matches_predicate(&value, predicate) {
                rows.push(QueryResultRow {
                    key,
                    fields: document_fields(&value),
                });
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn opts() -> Options {
        BTreeMap::new()
    }

    async fn adapter() -> (FileTreeAdapter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileTreeAdapter::new(dir.path()).await.unwrap();
        (adapter, dir)
    }

    #[tokio::test]
    async fn set_writes_a_collection_key_json_file() {
        let (adapter, dir) = adapter().await;
        adapter
            .set("cart", "u1", Value::Bool(true), &opts())
            .await
            .unwrap();
        assert!(dir.path().join("cart_u1.json").exists());
    }

    #[tokio::test]
    async fn get_on_missing_key_returns_null_sentinel() {
        let (adapter, _dir) = adapter().await;
        assert_eq!(adapter.get("cart", "u2", &opts()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips_the_value() {
        let (adapter, _dir) = adapter().await;
        let doc = Value::Object(
            [("items".to_owned(), Value::Array(vec![]))]
                .into_iter()
                .collect(),
        );
        adapter.set("cart", "u1", doc.clone(), &opts()).await.unwrap();
        assert_eq!(adapter.get("cart", "u1", &opts()).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn delete_unlinks_the_file_and_is_idempotent() {
        let (adapter, dir) = adapter().await;
        adapter.set("cart", "u1", Value::Null, &opts()).await.unwrap();
        adapter.delete("cart", "u1", &opts()).await.unwrap();
        assert!(!dir.path().join("cart_u1.json").exists());
        // Deleting again must still succeed.
        adapter.delete("cart", "u1", &opts()).await.unwrap();
    }

    #[tokio::test]
    async fn query_filters_by_collection_prefix_and_predicate() {
        let (adapter, _dir) = adapter().await;
        adapter
            .set(
                "cart",
                "u1",
                Value::Object([("total".to_owned(), Value::Number(7.into()))].into_iter().collect()),
                &opts(),
            )
            .await
            .unwrap();
        adapter
            .set(
                "cart",
                "u2",
                Value::Object([("total".to_owned(), Value::Number(3.into()))].into_iter().collect()),
                &opts(),
            )
            .await
            .unwrap();
        adapter
            .set("other", "u1", Value::Null, &opts())
            .await
            .unwrap();

        let predicate: BTreeMap<String, Scalar> =
            [("total".to_owned(), Scalar::Number(7.into()))].into_iter().collect();
        let rows = adapter.query("cart", &predicate, &opts()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "u1");
    }
}
