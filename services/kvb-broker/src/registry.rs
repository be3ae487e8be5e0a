//! Subscription Registry & Fan-out (C6).
//!
//! Maps `(collection, pattern) -> {client_id}` and `client_id -> SessionHandle`,
//! guarded by `tokio::sync::RwLock`: read locks for the fan-out lookup,
//! write locks for subscribe/unsubscribe/teardown.

use crate::session::{Outbound, SessionHandle};
use kvb_protocol::{Notification, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub const WILDCARD: &str = "*";

#[derive(Default)]
pub struct SubscriptionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    index: RwLock<HashMap<(String, String), HashSet<String>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<SessionHandle>) {
        self.sessions
            .write()
            .await
            .insert(session.client_id.clone(), session);
    }

    /// Removes a session's own record and purges every subscription entry
    /// it held, keeping the two indexes consistent under one critical path.
    pub async fn unregister(&self, client_id: &str) {
        let removed = self.sessions.write().await.remove(client_id);
        let Some(session) = removed else { return };
        let patterns: Vec<(String, String)> =
            session.subscriptions.read().await.iter().cloned().collect();
        let mut index = self.index.write().await;
        for pattern in patterns {
            if let Some(subscribers) = index.get_mut(&pattern) {
                subscribers.remove(client_id);
                if subscribers.is_empty() {
                    index.remove(&pattern);
                }
            }
        }
    }

    pub async fn session(&self, client_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(client_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn all_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// `SUBSCRIBE`: adds the pair to both indexes. A duplicate subscribe from
    /// the same session is a no-op success, not an error (see DESIGN.md).
    pub async fn subscribe(&self, client_id: &str, collection: &str, pattern: &str) {
        let key = (collection.to_owned(), pattern.to_owned());
        if let Some(session) = self.session(client_id).await {
            session.subscriptions.write().await.insert(key.clone());
        }
        self.index
            .write()
            .await
            .entry(key)
            .or_default()
            .insert(client_id.to_owned());
    }

    /// `UNSUBSCRIBE`: removes symmetrically. Returns `Err` if the session was
    /// not subscribed to this pattern — treated as a failure, not a no-op.
    pub async fn unsubscribe(&self, client_id: &str, collection: &str, pattern: &str) -> Result<(), ()> {
        let key = (collection.to_owned(), pattern.to_owned());
        let Some(session) = self.session(client_id).await else {
            return Err(());
        };
        let removed = session.subscriptions.write().await.remove(&key);
        if !removed {
            return Err(());
        }
        let mut index = self.index.write().await;
        if let Some(subscribers) = index.get_mut(&key) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                index.remove(&key);
            }
        }
        Ok(())
    }

    /// Fan-out on mutation. Delivery is best-effort: a full outbound
    /// queue on a subscriber is dropped and logged, never awaited, so a slow
    /// or disconnected subscriber cannot stall the mutator.
    pub async fn notify(
        &self,
        collection: &str,
        key: &str,
        operation: &str,
        value: Option<Value>,
        origin_client_id: &str,
    ) {
        let exact = (collection.to_owned(), key.to_owned());
        let wildcard = (collection.to_owned(), WILDCARD.to_owned());

        let mut targets: HashSet<String> = HashSet::new();
        {
            let index = self.index.read().await;
            if let Some(subs) = index.get(&exact) {
                targets.extend(subs.iter().cloned());
            }
            if let Some(subs) = index.get(&wildcard) {
                targets.extend(subs.iter().cloned());
            }
        }
        targets.remove(origin_client_id);
        if targets.is_empty() {
            return;
        }

        let notification = Notification::SubscriptionUpdate {
            collection: collection.to_owned(),
            key: key.to_owned(),
            operation: operation.to_owned(),
            value,
            timestamp: kvb_protocol::now_millis(),
        };

        let sessions = self.sessions.read().await;
        for client_id in targets {
            if let Some(session) = sessions.get(&client_id) {
                if !session.try_send(Outbound::Notification(notification.clone())) {
                    warn!(client_id = %client_id, "dropped subscription update: outbound queue full");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use kvb_protocol::Platform;

    async fn registered(registry: &SubscriptionRegistry, id: &str) -> tokio::sync::mpsc::Receiver<Outbound> {
        let (session, rx) = SessionHandle::new(id.to_owned(), Platform::Browser);
        registry.register(Arc::new(session)).await;
        rx
    }

    #[tokio::test]
    async fn subscribe_then_notify_delivers_exactly_one_update_to_subscriber_not_originator() {
        let registry = SubscriptionRegistry::new();
        let mut a_rx = registered(&registry, "A").await;
        let _b_rx = registered(&registry, "B").await;

        registry.subscribe("A", "cart", "u1").await;
        registry
            .notify("cart", "u1", "SET", Some(Value::Bool(true)), "B")
            .await;

        let msg = a_rx.try_recv().expect("A should receive the update");
        match msg {
            Outbound::Notification(Notification::SubscriptionUpdate { key, operation, .. }) => {
                assert_eq!(key, "u1");
                assert_eq!(operation, "SET");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(a_rx.try_recv().is_err(), "exactly one update expected");
    }

    #[tokio::test]
    async fn originator_never_receives_its_own_mutation() {
        let registry = SubscriptionRegistry::new();
        let mut a_rx = registered(&registry, "A").await;
        registry.subscribe("A", "cart", "u1").await;
        registry.notify("cart", "u1", "SET", None, "A").await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_subscription_sees_every_key_in_the_collection() {
        let registry = SubscriptionRegistry::new();
        let mut a_rx = registered(&registry, "A").await;
        let _b_rx = registered(&registry, "B").await;
        registry.subscribe("A", "cart", WILDCARD).await;

        registry.notify("cart", "u1", "SET", None, "B").await;
        registry.notify("cart", "u2", "DELETE", None, "B").await;

        let first = a_rx.try_recv().unwrap();
        let second = a_rx.try_recv().unwrap();
        match (first, second) {
            (
                Outbound::Notification(Notification::SubscriptionUpdate { operation: op1, .. }),
                Outbound::Notification(Notification::SubscriptionUpdate { operation: op2, value, .. }),
            ) => {
                assert_eq!(op1, "SET");
                assert_eq!(op2, "DELETE");
                assert!(value.is_none());
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_subscribe_is_a_no_op_not_an_error() {
        let registry = SubscriptionRegistry::new();
        let _rx = registered(&registry, "A").await;
        registry.subscribe("A", "cart", "u1").await;
        registry.subscribe("A", "cart", "u1").await;
        let session = registry.session("A").await.unwrap();
        assert_eq!(session.subscriptions.read().await.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_when_not_subscribed_fails_without_perturbing_state() {
        let registry = SubscriptionRegistry::new();
        let _rx = registered(&registry, "A").await;
        assert!(registry.unsubscribe("A", "cart", "u1").await.is_err());
    }

    #[tokio::test]
    async fn teardown_purges_every_subscription_entry_for_the_session() {
        let registry = SubscriptionRegistry::new();
        let a_rx = registered(&registry, "A").await;
        let mut b_rx = registered(&registry, "B").await;
        registry.subscribe("A", "cart", "u1").await;
        registry.unregister("A").await;
        drop(a_rx);

        registry.notify("cart", "u1", "SET", None, "B").await;
        assert!(b_rx.try_recv().is_err());
        assert_eq!(registry.session_count().await, 1);
    }
}
