//! Per-consumer event mailbox.

use super::{Event, EventKind, Notifier, SharedEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Callback run by [`EventListener::dispatch_current_events`].
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct ListenerState {
    /// Subscribed kinds in registration order.
    kinds: Vec<EventKind>,
    queues: HashMap<EventKind, VecDeque<SharedEvent>>,
    callbacks: HashMap<EventKind, Vec<EventCallback>>,
}

impl ListenerState {
    fn subscribe(&mut self, kind: EventKind) -> bool {
        if self.kinds.contains(&kind) {
            return false;
        }
        self.kinds.push(kind);
        self.queues.entry(kind).or_default();
        true
    }

    fn unsubscribe(&mut self, kind: EventKind) {
        self.kinds.retain(|registered| *registered != kind);
        self.queues.remove(&kind);
        self.callbacks.remove(&kind);
    }

    /// Pop the first event of any of `kinds` matching `correlation_id`.
    ///
    /// Events of a wanted kind with a different correlation id are dropped.
    fn take_matching(&mut self, kinds: &[EventKind], correlation_id: Option<u64>) -> Option<SharedEvent> {
        for kind in kinds {
            let Some(queue) = self.queues.get_mut(kind) else {
                continue;
            };

            while let Some(event) = queue.pop_front() {
                if correlation_id.is_none() || event.correlation_id == correlation_id {
                    return Some(event);
                }
            }
        }
        None
    }
}

/// Mailbox holding, per subscribed kind, an ordered queue of pending events.
pub struct EventListener {
    id: u64,
    name: String,
    state: Mutex<ListenerState>,
    condvar: Condvar,
    interrupt_notifier: Mutex<Option<Notifier>>,
}

impl EventListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: Mutex::new(ListenerState::default()),
            condvar: Condvar::new(),
            interrupt_notifier: Mutex::new(None),
        }
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Notifier signalled whenever an event is queued, so an owner blocked
    /// elsewhere can wake up and dispatch.
    pub fn set_interrupt_notifier(&self, notifier: Notifier) {
        *self
            .interrupt_notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }

    /// Subscribe to `kind` without a callback. Events queue until waited for or cleared.
    pub fn register_kind(&self, kind: EventKind) {
        self.lock().subscribe(kind);
    }

    /// Subscribe to `kind` and run `callback` for each event of that kind on dispatch.
    pub fn subscribe(&self, kind: EventKind, callback: impl Fn(&Event) + Send + Sync + 'static) {
        let mut state = self.lock();
        state.subscribe(kind);
        state.callbacks.entry(kind).or_default().push(Arc::new(callback));
    }

    /// Drop the subscription, its callbacks and any queued events.
    pub fn unsubscribe(&self, kind: EventKind) {
        self.lock().unsubscribe(kind);
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.lock().kinds.contains(&kind)
    }

    pub fn queued_event_count(&self) -> usize {
        self.lock().queues.values().map(VecDeque::len).sum()
    }

    /// Discard queued events of `kind`, keeping the subscription.
    pub fn clear_events(&self, kind: EventKind) {
        if let Some(queue) = self.lock().queues.get_mut(&kind) {
            queue.clear();
        }
    }

    pub(super) fn deliver(&self, event: &SharedEvent) {
        {
            let mut state = self.lock();
            let Some(queue) = state.queues.get_mut(&event.kind()) else {
                return;
            };
            queue.push_back(Arc::clone(event));
        }

        self.condvar.notify_all();
        if let Some(notifier) = self
            .interrupt_notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            notifier.notify();
        }
    }

    /// Block until an event of one of `kinds` arrives, optionally matching
    /// `correlation_id`, or `timeout` elapses (`None` waits indefinitely).
    ///
    /// Kinds not already subscribed are subscribed for the duration of the
    /// call only. Queued events of a wanted kind whose correlation id does not
    /// match are discarded.
    pub fn wait_for(
        &self,
        kinds: &[EventKind],
        timeout: Option<Duration>,
        correlation_id: Option<u64>,
    ) -> Option<SharedEvent> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        let temporary: Vec<EventKind> = kinds
            .iter()
            .copied()
            .filter(|kind| state.subscribe(*kind))
            .collect();

        let event = loop {
            if let Some(event) = state.take_matching(kinds, correlation_id) {
                break Some(event);
            }

            match deadline {
                None => {
                    state = self.condvar.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break None;
                    }
                    state = self
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        };

        for kind in temporary {
            state.unsubscribe(kind);
        }
        event
    }

    /// Pop every queued event that has callbacks and run them on the calling thread.
    ///
    /// Kinds are visited in registration order; events within a kind in
    /// arrival order. Callbacks run without the listener lock held, so they
    /// may publish or subscribe freely.
    pub fn dispatch_current_events(&self) {
        let batches: Vec<(Vec<SharedEvent>, Vec<EventCallback>)> = {
            let mut state = self.lock();
            let kinds = state.kinds.clone();
            kinds
                .into_iter()
                .filter_map(|kind| {
                    let callbacks = state.callbacks.get(&kind).filter(|c| !c.is_empty())?.clone();
                    let events: Vec<_> = state.queues.get_mut(&kind)?.drain(..).collect();
                    (!events.is_empty()).then_some((events, callbacks))
                })
                .collect()
        };

        for (events, callbacks) in batches {
            for event in &events {
                for callback in &callbacks {
                    callback(event);
                }
            }
        }
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventManager, EventPayload};
    use crate::target::TargetBreakCause;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn stopped(program_counter: u32) -> EventPayload {
        EventPayload::TargetExecutionStopped {
            program_counter,
            break_cause: TargetBreakCause::Unknown,
        }
    }

    #[test]
    fn test_wait_for_times_out_without_event() {
        let listener = EventListener::new("test");
        let start = Instant::now();

        let event = listener.wait_for(&[EventKind::TargetReset], Some(Duration::from_millis(20)), None);
        assert!(event.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!listener.is_subscribed(EventKind::TargetReset));
    }

    #[test]
    fn test_wait_for_wakes_on_publish() {
        let manager = Arc::new(EventManager::new());
        let listener = Arc::new(EventListener::new("waiter"));
        listener.register_kind(EventKind::TargetExecutionStopped);
        manager.register_listener(listener.clone());

        let publisher = {
            let manager = manager.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                manager.publish(stopped(0x42));
            })
        };

        let event = listener
            .wait_for(&[EventKind::TargetExecutionStopped], Some(Duration::from_secs(5)), None)
            .unwrap();
        publisher.join().unwrap();

        assert!(matches!(
            event.payload,
            EventPayload::TargetExecutionStopped { program_counter: 0x42, .. }
        ));
    }

    #[test]
    fn test_wait_for_filters_on_correlation_id() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("correlated"));
        listener.register_kind(EventKind::TargetReset);
        manager.register_listener(listener.clone());

        manager.publish(Event::new(EventPayload::TargetReset).with_correlation_id(1));
        manager.publish(Event::new(EventPayload::TargetReset).with_correlation_id(2));

        let event = listener
            .wait_for(&[EventKind::TargetReset], Some(Duration::from_millis(50)), Some(2))
            .unwrap();
        assert_eq!(event.correlation_id, Some(2));

        // The non-matching event was discarded rather than requeued.
        assert_eq!(listener.queued_event_count(), 0);
    }

    #[test]
    fn test_wait_for_restores_subscriptions() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("restore"));
        listener.register_kind(EventKind::TargetReset);
        manager.register_listener(listener.clone());

        let kinds = [EventKind::TargetReset, EventKind::TargetExecutionResumed];
        assert!(listener.wait_for(&kinds, Some(Duration::from_millis(5)), None).is_none());

        assert!(listener.is_subscribed(EventKind::TargetReset));
        assert!(!listener.is_subscribed(EventKind::TargetExecutionResumed));
    }

    #[test]
    fn test_dispatch_preserves_order_within_kind() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("dispatch"));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let record = seen.clone();
        listener.subscribe(EventKind::TargetExecutionStopped, move |event| {
            if let EventPayload::TargetExecutionStopped { program_counter, .. } = event.payload {
                record.lock().unwrap().push(program_counter);
            }
        });
        manager.register_listener(listener.clone());

        for pc in [1, 2, 3] {
            manager.publish(stopped(pc));
        }

        assert!(seen.lock().unwrap().is_empty());
        listener.dispatch_current_events();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_dispatch_runs_callbacks_on_calling_thread_only() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("callbacks"));
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        listener.subscribe(EventKind::TargetReset, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.register_listener(listener.clone());

        manager.publish(EventPayload::TargetReset);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        listener.dispatch_current_events();
        listener.dispatch_current_events();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_notifier_signalled_on_delivery() {
        let manager = EventManager::new();
        let listener = Arc::new(EventListener::new("notified"));
        let notifier = Notifier::new();
        listener.set_interrupt_notifier(notifier.clone());
        listener.register_kind(EventKind::TargetReset);
        manager.register_listener(listener);

        manager.publish(EventPayload::TargetReset);
        assert!(notifier.wait(Duration::from_millis(10)));
    }
}
