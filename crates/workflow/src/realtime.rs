//! Realtime stock broadcasting.
//!
//! The hub fans stock changes out to every subscribed transport and owns the
//! registry of connected users. The registry lives and dies with the hub, so
//! a server restart starts from an empty registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use common::UserId;
use domain::StockChange;
use tokio::sync::broadcast;

/// Publishes stock changes to connected clients.
///
/// Publishing is fire-and-forget: the workflow never waits for delivery.
pub trait StockBroadcaster: Send + Sync {
    fn publish_stock_change(&self, changes: Vec<StockChange>);
}

/// Per-process registry of open client connections.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<UserId, HashSet<String>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a connection for `user`. Returns true if the user just came online.
    pub fn register(&self, user: UserId, connection: impl Into<String>) -> bool {
        let mut connections = self.connections.write().unwrap();
        let set = connections.entry(user).or_default();
        let was_offline = set.is_empty();
        set.insert(connection.into());
        was_offline
    }

    /// Drops a connection. Returns true if it was the user's last one.
    pub fn unregister(&self, user: UserId, connection: &str) -> bool {
        let mut connections = self.connections.write().unwrap();
        let Some(set) = connections.get_mut(&user) else {
            return false;
        };
        if !set.remove(connection) {
            return false;
        }
        if set.is_empty() {
            connections.remove(&user);
            return true;
        }
        false
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.connections.read().unwrap().contains_key(&user)
    }

    /// Number of users with at least one open connection.
    pub fn online_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Forgets every connection.
    pub fn clear(&self) {
        self.connections.write().unwrap().clear();
    }
}

struct HubInner {
    sender: broadcast::Sender<Vec<StockChange>>,
    connections: ConnectionManager,
}

/// Broadcast hub for stock changes.
#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RealtimeHub {
    /// Creates a hub buffering up to `capacity` undelivered updates per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(HubInner {
                sender,
                connections: ConnectionManager::new(),
            }),
        }
    }

    /// Subscribes a transport to stock updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<StockChange>> {
        self.inner.sender.subscribe()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.connections
    }

    /// Drops all registered connections on server stop.
    pub fn shutdown(&self) {
        let online = self.inner.connections.online_count();
        self.inner.connections.clear();
        tracing::info!(online, "realtime hub shut down");
    }
}

impl StockBroadcaster for RealtimeHub {
    fn publish_stock_change(&self, changes: Vec<StockChange>) {
        if changes.is_empty() {
            return;
        }
        // No subscribers is not an error
        let delivered = self.inner.sender.send(changes).unwrap_or(0);
        tracing::debug!(subscribers = delivered, "stock change published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn test_register_and_unregister() {
        let manager = ConnectionManager::new();
        let user = UserId::new();

        assert!(manager.register(user, "conn-1"));
        assert!(!manager.register(user, "conn-2"));
        assert!(manager.is_online(user));
        assert_eq!(manager.online_count(), 1);

        assert!(!manager.unregister(user, "conn-1"));
        assert!(manager.is_online(user));
        assert!(manager.unregister(user, "conn-2"));
        assert!(!manager.is_online(user));
        assert!(!manager.unregister(user, "conn-2"));
    }

    #[tokio::test]
    async fn test_subscribers_receive_changes() {
        let hub = RealtimeHub::default();
        let mut rx = hub.subscribe();
        let change = StockChange {
            product_id: ProductId::new(),
            new_stock: 3,
        };

        hub.publish_stock_change(vec![change]);
        assert_eq!(rx.recv().await.unwrap(), vec![change]);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = RealtimeHub::default();
        hub.publish_stock_change(vec![StockChange {
            product_id: ProductId::new(),
            new_stock: 0,
        }]);
    }

    #[test]
    fn test_shutdown_clears_registry() {
        let hub = RealtimeHub::default();
        hub.connections().register(UserId::new(), "a");
        hub.connections().register(UserId::new(), "b");
        hub.shutdown();
        assert_eq!(hub.connections().online_count(), 0);
    }
}
