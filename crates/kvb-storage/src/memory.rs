//! In-memory adapter — the authoritative reference implementation.
//!
//! A single read/write lock guards a plain map: read locks for lookups,
//! write locks for mutation.

use crate::{document_fields, matches_predicate, Options, StorageAdapter, StorageError};
use async_trait::async_trait;
use kvb_protocol::{now_millis, DeleteResult, QueryResultRow, Scalar, SetResult, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryAdapter {
    // Insertion order is tracked alongside the map so `query` can return a
    // stable, adapter-declared order.
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    values: HashMap<(String, String), Value>,
    insertion_order: Vec<(String, String)>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(
        &self,
        collection: &str,
        key: &str,
        _options: &Options,
    ) -> Result<Option<Value>, StorageError> {
        let inner = self.inner.read().expect("memory adapter lock poisoned");
        Ok(inner
            .values
            .get(&(collection.to_owned(), key.to_owned()))
            .cloned())
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        _options: &Options,
    ) -> Result<SetResult, StorageError> {
        let mut inner = self.inner.write().expect("memory adapter lock poisoned");
        let id = (collection.to_owned(), key.to_owned());
        if !inner.values.contains_key(&id) {
            inner.insertion_order.push(id.clone());
        }
        inner.values.insert(id, value);
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
        let mut inner = self.inner.write().expect("memory adapter lock poisoned");
        let id = (collection.to_owned(), key.to_owned());
        inner.values.remove(&id);
        inner.insertion_order.retain(|existing| existing != &id);
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
        let inner = self.inner.read().expect("memory adapter lock poisoned");
        let rows = inner
            .insertion_order
            .iter()
            .filter(|(c, _)| c == collection)
            .filter_map(|id| inner.values.get(id).map(|v| (id, v)))
            .filter(|(_, value)| matches_predicate(value, predicate))
            .map(|((_, key), value)| QueryResultRow {
                key: key.clone(),
                fields: document_fields(value),
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> Options {
        BTreeMap::new()
    }

    #[tokio::test]
    async fn get_on_missing_key_returns_null_sentinel_not_error() {
        let adapter = MemoryAdapter::new();
        let value = adapter.get("cart", "u1", &opts()).await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn set_then_get_observes_the_new_value() {
        let adapter = MemoryAdapter::new();
        let doc = Value::Object(
            [("total".to_owned(), Value::Number(0.into()))]
                .into_iter()
                .collect(),
        );
        adapter.set("cart", "u1", doc.clone(), &opts()).await.unwrap();
        let fetched = adapter.get("cart", "u1", &opts()).await.unwrap();
        assert_eq!(fetched, Some(doc));
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_a_missing_key() {
        let adapter = MemoryAdapter::new();
        let result = adapter.delete("cart", "ghost", &opts()).await.unwrap();
        assert_eq!(result.deleted, "ghost");
    }

    #[tokio::test]
    async fn delete_then_get_observes_null() {
        let adapter = MemoryAdapter::new();
        adapter
            .set("cart", "u1", Value::Bool(true), &opts())
            .await
            .unwrap();
        adapter.delete("cart", "u1", &opts()).await.unwrap();
        assert_eq!(adapter.get("cart", "u1", &opts()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn query_matches_conjunctive_scalar_equality_in_insertion_order() {
        let adapter = MemoryAdapter::new();
        for (key, total, active) in [("a", 1, true), ("b", 2, true), ("c", 1, false)] {
            let doc = Value::Object(
                [
                    ("total".to_owned(), Value::Number(total.into())),
                    ("active".to_owned(), Value::Bool(active)),
                ]
                .into_iter()
                .collect(),
            );
            adapter.set("orders", key, doc, &opts()).await.unwrap();
        }

        let predicate: BTreeMap<String, Scalar> =
            [("total".to_owned(), Scalar::Number(1.into()))].into_iter().collect();
        let rows = adapter.query("orders", &predicate, &opts()).await.unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn query_with_empty_predicate_matches_every_document_in_the_collection() {
        let adapter = MemoryAdapter::new();
        adapter.set("c", "k1", Value::Null, &opts()).await.unwrap();
        adapter.set("c", "k2", Value::Null, &opts()).await.unwrap();
        adapter.set("other", "k3", Value::Null, &opts()).await.unwrap();

        let rows = adapter.query("c", &BTreeMap::new(), &opts()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
