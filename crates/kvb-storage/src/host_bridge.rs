//! Host-bridge adapter — the seam external mobile-host integrations plug
//! into.
//!
//! `HostBridge` is the contract a host process implements; `HostBridgeAdapter`
//! is the thin `StorageAdapter` wrapper the dispatcher actually calls. The
//! `LoopbackHostBridge` below is a test double only — a real deployment
//! supplies its own `HostBridge` from outside this workspace.

use crate::{Options, StorageAdapter, StorageError};
use async_trait::async_trait;
use kvb_protocol::{DeleteResult, QueryResultRow, Scalar, SetResult, Value};
use std::collections::BTreeMap;

#[async_trait]
pub trait HostBridge: Send + Sync {
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

pub struct HostBridgeAdapter<H: HostBridge> {
    bridge: H,
}

impl<H: HostBridge> HostBridgeAdapter<H> {
    pub fn new(bridge: H) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl<H: HostBridge> StorageAdapter for HostBridgeAdapter<H> {
    async fn get(&self, collection: &str, key: &str, options: &Options) -> Result<Option<Value>, StorageError> {
        self.bridge.get(collection, key, options).await
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        options: &Options,
    ) -> Result<SetResult, StorageError> {
        self.bridge.set(collection, key, value, options).await
    }

    async fn delete(&self, collection: &str, key: &str, options: &Options) -> Result<DeleteResult, StorageError> {
        self.bridge.delete(collection, key, options).await
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &BTreeMap<String, Scalar>,
        options: &Options,
    ) -> Result<Vec<QueryResultRow>, StorageError> {
        self.bridge.query(collection, predicate, options).await
    }
}

/// A host bridge backed by the in-memory adapter — used only by tests to
/// exercise `HostBridgeAdapter` without a real host process attached.
pub struct LoopbackHostBridge {
    inner: crate::memory::MemoryAdapter,
}

impl LoopbackHostBridge {
    pub fn new() -> Self {
        Self {
            inner: crate::memory::MemoryAdapter::new(),
        }
    }
}

impl Default for LoopbackHostBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBridge for LoopbackHostBridge {
    async fn get(&self, collection: &str, key: &str, options: &Options) -> Result<Option<Value>, StorageError> {
        self.inner.get(collection, key, options).await
    }

    async fn set(
        &self,
        collection: &str,
        key: &str,
        value: Value,
        options: &Options,
    ) -> Result<SetResult, StorageError> {
        self.inner.set(collection, key, value, options).await
    }

    async fn delete(&self, collection: &str, key: &str, options: &Options) -> Result<DeleteResult, StorageError> {
        self.inner.delete(collection, key, options).await
    }

    async fn query(
        &self,
        collection: &str,
        predicate: &BTreeMap<String, Scalar>,
        options: &Options,
    ) -> Result<Vec<QueryResultRow>, StorageError> {
        self.inner.query(collection, predicate, options).await
    }
}
