//! Notification bus for resource status changes.
//!
//! Subscribers register a callback per event kind and get back a
//! [`Subscription`] handle; dropping the handle unsubscribes. Callbacks run
//! on the publishing task, after the subscriber list lock is released, so a
//! callback may subscribe or unsubscribe without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stride_types::VersionStatus;
use tracing::trace;

/// Kinds of bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A content update finished successfully.
    Complete,
    /// A content update failed and needs an explicit retry.
    Failed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Complete => write!(f, "complete"),
            EventKind::Failed => write!(f, "failed"),
        }
    }
}

/// A status change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub kind: EventKind,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    pub status: VersionStatus,
}

impl BusEvent {
    pub fn complete(resource_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Complete,
            resource_id: resource_id.into(),
            new_version: Some(version.into()),
            status: VersionStatus::Ready,
        }
    }

    pub fn failed(resource_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Failed,
            resource_id: resource_id.into(),
            new_version: None,
            status: VersionStatus::Failed,
        }
    }
}

type Callback = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: EventKind,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// Multi-subscriber event bus.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.inner.subscribers.read().len())
            .finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push(Subscriber {
            id,
            kind,
            callback: Arc::new(callback),
        });
        trace!(%kind, id, "Subscribed");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
            kind,
            armed: true,
        }
    }

    /// Deliver `event` to every subscriber of its kind. Returns how many
    /// callbacks ran.
    pub fn publish(&self, event: &BusEvent) -> usize {
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind == event.kind)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        trace!(kind = %event.kind, resource_id = %event.resource_id, delivered = callbacks.len(), "Published");
        callbacks.len()
    }

    /// Number of live subscriptions for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.kind == kind)
            .count()
    }
}

/// Handle for one subscription. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
    kind: EventKind,
    armed: bool,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        self.detach_from_bus();
    }

    /// Keep the subscription for as long as the bus lives.
    pub fn detach(mut self) {
        self.armed = false;
    }

    fn detach_from_bus(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(bus) = self.bus.upgrade()
            && bus.remove(self.id)
        {
            trace!(kind = %self.kind, id = self.id, "Unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach_from_bus();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_multiple_subscribers_receive_events_of_their_kind() {
        let bus = NotificationBus::new();
        let complete = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&complete);
        let _a = bus.subscribe(EventKind::Complete, move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&complete);
        let _b = bus.subscribe(EventKind::Complete, move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        let f = Arc::clone(&failed);
        let _c = bus.subscribe(EventKind::Failed, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&BusEvent::complete("c1", "v2")), 2);
        assert_eq!(complete.load(Ordering::SeqCst), 2);
        assert_eq!(failed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_and_drop_detach() {
        let bus = NotificationBus::new();
        let a = bus.subscribe(EventKind::Failed, |_| {});
        let b = bus.subscribe(EventKind::Failed, |_| {});
        assert_eq!(bus.subscriber_count(EventKind::Failed), 2);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count(EventKind::Failed), 1);

        drop(b);
        assert_eq!(bus.publish(&BusEvent::failed("c1")), 0);
    }

    #[test]
    fn test_detached_subscription_outlives_handle() {
        let bus = NotificationBus::new();
        bus.subscribe(EventKind::Complete, |_| {}).detach();
        assert_eq!(bus.subscriber_count(EventKind::Complete), 1);
    }

    #[test]
    fn test_callback_may_subscribe_during_publish() {
        let bus = NotificationBus::new();
        let late = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let inner_late = Arc::clone(&late);
        let _s = bus.subscribe(EventKind::Complete, move |_| {
            inner_late
                .lock()
                .push(inner_bus.subscribe(EventKind::Failed, |_| {}));
        });

        bus.publish(&BusEvent::complete("c1", "v2"));
        assert_eq!(bus.subscriber_count(EventKind::Failed), 1);
    }

    #[test]
    fn test_event_carries_version_and_status() {
        let event = BusEvent::complete("c1", "v2");
        assert_eq!(event.new_version.as_deref(), Some("v2"));
        assert_eq!(event.status, VersionStatus::Ready);

        let json = serde_json::to_value(BusEvent::failed("c1")).unwrap();
        assert_eq!(json["kind"], "failed");
        assert!(json.get("newVersion").is_none());
    }
}
