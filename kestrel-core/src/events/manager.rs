//! Event distribution.

use super::{Event, EventKind, EventListener, SharedEvent};
use log::trace;
use std::sync::{Arc, Mutex, PoisonError};

/// Routes published events to subscribed listeners.
///
/// Owned explicitly and shared as `Arc<EventManager>`; separate instances are
/// fully independent.
#[derive(Default)]
pub struct EventManager {
    listeners: Mutex<Vec<Arc<EventListener>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(&self, listener: Arc<EventListener>) {
        self.lock().push(listener);
    }

    pub fn deregister_listener(&self, listener_id: u64) {
        self.lock().retain(|listener| listener.id() != listener_id);
    }

    /// Queue the event on every listener subscribed to its kind.
    ///
    /// Never blocks on listener side processing. Publishing with no
    /// subscribers is a no-op.
    pub fn publish(&self, event: impl Into<Event>) -> SharedEvent {
        let event = Arc::new(event.into());
        let listeners = self.lock().clone();

        trace!("Publishing {:?} (id {})", event.kind(), event.id);
        for listener in &listeners {
            listener.deliver(&event);
        }
        event
    }

    /// Whether any registered listener is subscribed to `kind`.
    pub fn is_kind_listened_for(&self, kind: EventKind) -> bool {
        self.lock().iter().any(|listener| listener.is_subscribed(kind))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<EventListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use std::time::Duration;

    #[test]
    fn test_publish_without_listeners_is_noop() {
        let manager = EventManager::new();
        let event = manager.publish(EventPayload::TargetReset);

        assert_eq!(event.kind(), EventKind::TargetReset);
        assert!(!manager.is_kind_listened_for(EventKind::TargetReset));
    }

    #[test]
    fn test_delivery_only_to_subscribed_listeners() {
        let manager = EventManager::new();
        let subscribed = Arc::new(EventListener::new("subscribed"));
        let other = Arc::new(EventListener::new("other"));
        subscribed.register_kind(EventKind::TargetReset);
        manager.register_listener(subscribed.clone());
        manager.register_listener(other.clone());

        manager.publish(EventPayload::TargetReset);

        assert!(manager.is_kind_listened_for(EventKind::TargetReset));
        assert_eq!(subscribed.queued_event_count(), 1);
        assert_eq!(other.queued_event_count(), 0);
    }

    #[test]
    fn test_deregistered_listener_receives_nothing() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("gone"));
        listener.register_kind(EventKind::TargetReset);
        manager.register_listener(listener.clone());
        manager.deregister_listener(listener.id());

        manager.publish(EventPayload::TargetReset);
        assert!(listener
            .wait_for(&[EventKind::TargetReset], Some(Duration::from_millis(10)), None)
            .is_none());
    }
}
