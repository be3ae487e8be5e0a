//! Storage Adapter Interface (C1) and concrete adapters (C2).
//!
//! An adapter is a uniform, namespaced key/value store: `get`/`set`/`delete`
//! never fail on a missing key (the storage boundary reports that as `None`,
//! not an error), and `query` is a flat equality conjunction over scalar
//! document fields. Adapters must tolerate unknown `options` hints rather
//! than error on them.

pub mod file_tree;
pub mod host_bridge;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use kvb_protocol::{DeleteResult, QueryResultRow, Scalar, SetResult, Value};
use std::collections::BTreeMap;

pub type Options = BTreeMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(
        &self,
        collection: &str,
        key: &str,
        options: &Options,
    ) -> Result<Option<Value>, StorageError>;

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        options: &Options,
    ) -> Result<SetResult, StorageError>;

    async fn delete(
        &self,
        collection: &str,
        key: &str,
        options: &Options,
    ) -> Result<DeleteResult, StorageError>;

    async fn query(
        &self,
        collection: &str,
        predicate: &BTreeMap<String, Scalar>,
        options: &Options,
    ) -> Result<Vec<QueryResultRow>, StorageError>;
}

/// Applies a flat equality conjunction to a stored document. An empty
/// predicate matches every document in the collection.
pub(crate) fn matches_predicate(value: &Value, predicate: &BTreeMap<String, Scalar>) -> bool {
    predicate
        .iter()
        .all(|(field, expected)| match value.get(field) {
            Some(actual) => expected.matches(actual),
            None => false,
        })
}

pub(crate) fn document_fields(value: &Value) -> BTreeMap<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => BTreeMap::new(),
    }
}
