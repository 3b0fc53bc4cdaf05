use crate::features::connection::service::NotificationHandler;
use crate::types::ApplicationInstance;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Notification method the server uses to push instance updates.
pub const INSTANCE_UPDATE_METHOD: &str = "onInstanceUpdate";

/// Key that receives the updates of every instance.
pub const ALL_INSTANCES: &str = "";

const DEFAULT_BUFFER: usize = 10;

type Waiters = HashMap<u64, mpsc::Sender<ApplicationInstance>>;

/// Maps instance ids to the waiters interested in them. Dispatch takes the
/// read lock; registration and removal take the write lock.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, Waiters>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a waiter for `instance_id`, or for every instance when the
    /// id is empty. The waiter is removed when the returned handle drops.
    pub fn subscribe(self: &Arc<Self>, instance_id: &str) -> InstanceUpdates {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(instance_id.to_string())
            .or_default()
            .insert(id, sender);

        InstanceUpdates {
            receiver,
            registry: Arc::clone(self),
            key: instance_id.to_string(),
            id,
        }
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(waiters) = subscribers.get_mut(key) {
            waiters.remove(&id);
            if waiters.is_empty() {
                subscribers.remove(key);
            }
        }
    }

    /// Fans an update out to the instance's waiters and the catch-all
    /// waiters. Never blocks: a waiter whose buffer is full misses the
    /// update. Returns the number of waiters that received it.
    pub fn dispatch(&self, instance: &ApplicationInstance) -> usize {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for key in [instance.id.as_str(), ALL_INSTANCES] {
            let Some(waiters) = subscribers.get(key) else {
                continue;
            };
            for sender in waiters.values() {
                match sender.try_send(instance.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(instance_id = %instance.id, "Dropping instance update for slow waiter");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
            if key.is_empty() {
                break;
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum()
    }
}

impl NotificationHandler for SubscriberRegistry {
    fn handle_notification(&self, method: &str, params: Value) {
        if method != INSTANCE_UPDATE_METHOD {
            debug!(%method, "Ignoring server notification");
            return;
        }

        let payload = match params {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };

        match serde_json::from_value::<ApplicationInstance>(payload) {
            Ok(instance) => {
                self.dispatch(&instance);
            }
            Err(error) => warn!(error = %error, "Malformed instance update"),
        }
    }
}

/// Stream of updates for one registration.
pub struct InstanceUpdates {
    receiver: mpsc::Receiver<ApplicationInstance>,
    registry: Arc<SubscriberRegistry>,
    key: String,
    id: u64,
}

impl InstanceUpdates {
    pub async fn recv(&mut self) -> Option<ApplicationInstance> {
        self.receiver.recv().await
    }

    pub fn instance_id(&self) -> &str {
        &self.key
    }
}

impl Drop for InstanceUpdates {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(id: &str) -> ApplicationInstance {
        ApplicationInstance {
            id: id.to_string(),
            application_id: "red-fox-12345678".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_matching_and_wildcard_waiters() {
        let registry = Arc::new(SubscriberRegistry::default());
        let mut specific = registry.subscribe("inst-1");
        let mut other = registry.subscribe("inst-2");
        let mut all = registry.subscribe(ALL_INSTANCES);

        assert_eq!(registry.dispatch(&instance("inst-1")), 2);

        assert_eq!(specific.recv().await.unwrap().id, "inst-1");
        assert_eq!(all.recv().await.unwrap().id, "inst-1");
        assert!(other.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_handle_deregisters() {
        let registry = Arc::new(SubscriberRegistry::default());
        let first = registry.subscribe("inst-1");
        let second = registry.subscribe("inst-1");
        assert_eq!(registry.subscriber_count(), 2);

        drop(first);
        assert_eq!(registry.subscriber_count(), 1);
        drop(second);
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(registry.dispatch(&instance("inst-1")), 0);
    }

    #[tokio::test]
    async fn test_full_waiter_does_not_block_dispatch() {
        let registry = Arc::new(SubscriberRegistry::new(1));
        let mut slow = registry.subscribe("inst-1");

        assert_eq!(registry.dispatch(&instance("inst-1")), 1);
        assert_eq!(registry.dispatch(&instance("inst-1")), 0);

        assert!(slow.recv().await.is_some());
        assert!(slow.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notification_handler_accepts_positional_params() {
        let registry = Arc::new(SubscriberRegistry::default());
        let mut updates = registry.subscribe("inst-1");

        registry.handle_notification(
            INSTANCE_UPDATE_METHOD,
            json!([{ "id": "inst-1", "applicationId": "red-fox-12345678", "status": { "phase": "stopping" } }]),
        );
        registry.handle_notification(
            INSTANCE_UPDATE_METHOD,
            json!({ "id": "inst-1", "applicationId": "red-fox-12345678" }),
        );
        registry.handle_notification("onCreditAlert", json!([]));

        let first = updates.recv().await.unwrap();
        assert_eq!(first.status.phase, crate::types::InstancePhase::Stopping);
        let second = updates.recv().await.unwrap();
        assert_eq!(second.status.phase, crate::types::InstancePhase::Unknown);
        assert!(updates.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_dispatch() {
        let registry = Arc::new(SubscriberRegistry::new(64));
        let mut handles = Vec::new();

        for i in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut updates = registry.subscribe(&format!("inst-{i}"));
                registry.dispatch(&instance(&format!("inst-{i}")));
                updates.recv().await.map(|update| update.id)
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(format!("inst-{i}")));
        }
        assert_eq!(registry.subscriber_count(), 0);
    }
}
