//! Shared broker state: one `AppState` clone per connection handler, threaded
//! through `axum::extract::State`.

use crate::config::BrokerConfig;
use crate::registry::SubscriptionRegistry;
use kvb_storage::{file_tree::FileTreeAdapter, memory::MemoryAdapter, StorageAdapter, StorageError};
use kvb_protocol::Platform;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: BrokerConfig,
    pub subscriptions: Arc<SubscriptionRegistry>,
    adapters: Arc<HashMap<&'static str, Arc<dyn StorageAdapter>>>,
    default_adapter: Arc<dyn StorageAdapter>,
}

impl AppState {
    /// One adapter per platform family, matching the capability table:
    /// browser/react-native/other get an in-memory adapter (no host
    /// filesystem access from the broker's perspective), nodejs/server
    /// clients get the file-tree adapter rooted at `config.data_dir`.
    pub async fn new(config: BrokerConfig) -> Result<Self, StorageError> {
        let file_tree = Arc::new(FileTreeAdapter::new(config.data_dir.clone()).await?);
        let mut adapters: HashMap<&'static str, Arc<dyn StorageAdapter>> = HashMap::new();
        adapters.insert("browser", Arc::new(MemoryAdapter::new()));
        adapters.insert("react-native", Arc::new(MemoryAdapter::new()));
        adapters.insert("nodejs", file_tree);
        let default_adapter: Arc<dyn StorageAdapter> = Arc::new(MemoryAdapter::new());

        Ok(Self {
            config,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            adapters: Arc::new(adapters),
            default_adapter,
        })
    }

    /// Picks the adapter for a connection's detected platform. Unrecognised
    /// (`Platform::Other`) platforms fall back to an in-memory adapter —
    /// the capability table already limits them to `["memory"]`.
    pub fn adapter_for(&self, platform: &Platform) -> Arc<dyn StorageAdapter> {
        self.adapters
            .get(platform.as_str())
            .cloned()
            .unwrap_or_else(|| self.default_adapter.clone())
    }
}
