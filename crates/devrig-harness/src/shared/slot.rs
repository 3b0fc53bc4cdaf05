use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Settable-once cell shared by concurrent producers. The first `resolve`
/// commits; every later call is a no-op.
pub struct ResolutionSlot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResolutionSlot<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (slot, receiver)
    }

    /// Returns true if this call committed the value.
    pub fn resolve(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                // A dropped receiver means nobody waits any more; the slot
                // still counts as resolved.
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
