use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::events::ComputationNotification;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Concurrent table of notification listeners, keyed by listener id
#[derive(Debug, Default)]
pub struct EventListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<ListenerId, (String, flume::Sender<ComputationNotification>)>,
}

impl EventListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event_name: &str) -> (ListenerId, flume::Receiver<ComputationNotification>) {
        let listener_id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = flume::unbounded();
        self.listeners
            .insert(listener_id, (event_name.to_string(), sender));
        trace!(
            target = "whispr-substrate",
            event = "listener_added",
            listener_id = listener_id.0,
            event_name,
            "Added event listener"
        );
        (listener_id, receiver)
    }

    pub fn remove(&self, listener_id: ListenerId) -> bool {
        let removed = self.listeners.remove(&listener_id).is_some();
        trace!(
            target = "whispr-substrate",
            event = "listener_removed",
            listener_id = listener_id.0,
            removed,
            "Removed event listener"
        );
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Delivers `notification` to every listener registered for its name.
    ///
    /// Listeners whose receiver was dropped are left in place; removal belongs to whoever
    /// registered them. Returns the number of listeners reached.
    pub fn emit(&self, notification: &ComputationNotification) -> usize {
        self.listeners
            .iter()
            .filter(|entry| entry.value().0 == notification.event_name)
            .filter(|entry| entry.value().1.send(notification.clone()).is_ok())
            .count()
    }
}
