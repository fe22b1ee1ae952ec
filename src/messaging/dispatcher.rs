//! Keyed multi-listener event registry (C3).
//!
//! Re-expresses the mix-in `EventEmitter` the original Python implementation
//! attaches to nearly every class (`socketio/event_emitter/__init__.py`) as a
//! single value held by composition: each component that emits events (the
//! transports, the engine session, the messaging client/namespace/socket)
//! owns one and delegates its public `on`/`emit` to it (see
//! "Event dispatcher instead of inheritance").
//!
//! Listeners are plain closures rather than `async fn`s: emitting is a
//! synchronous fan-out, matching the original's `for fxn in self._events[event]: fxn(*args)`.
//! A listener that needs to do async work spawns its own task.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Opaque handle identifying the owner of a group of listeners, so they can
/// all be torn down in one call (`remove_listeners_by_key` in the original).
pub type OwnerKey = u64;

static NEXT_OWNER_KEY: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh owner key, e.g. for a `MessagingClient` to tag the listeners
/// it registers on its `EngineSession` so teardown is O(1).
pub fn new_owner_key() -> OwnerKey {
    NEXT_OWNER_KEY.fetch_add(1, Ordering::Relaxed)
}

type Listener<A> = std::sync::Arc<dyn Fn(&A) + Send + Sync>;

struct Entry<A> {
    id: u64,
    owner: Option<OwnerKey>,
    once: bool,
    f: Listener<A>,
}

/// A dispatcher keyed by event name `K`, delivering a single argument value
/// `A` to each listener. Components that need multiple logical argument
/// shapes for one event key typically make `A` an enum.
pub struct EventDispatcher<K, A> {
    inner: Mutex<Inner<K, A>>,
}

struct Inner<K, A> {
    listeners: HashMap<K, Vec<Entry<A>>>,
    next_id: u64,
}

impl<K: Eq + Hash + Clone, A> Default for EventDispatcher<K, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, A> EventDispatcher<K, A> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                listeners: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn push(&self, event: K, owner: Option<OwnerKey>, once: bool, f: Listener<A>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .listeners
            .entry(event)
            .or_default()
            .push(Entry { id, owner, once, f });
        id
    }

    /// Register a persistent listener. Duplicates are allowed, as in the
    /// original (`_events[event].append(f)`).
    pub fn on(&self, event: K, f: impl Fn(&A) + Send + Sync + 'static) -> u64 {
        self.push(event, None, false, std::sync::Arc::new(f))
    }

    /// Same as [`on`](Self::on) but tags the listener with an owner key so a
    /// later [`remove_by_owner`](Self::remove_by_owner) can remove it in bulk.
    pub fn on_owned(&self, event: K, owner: OwnerKey, f: impl Fn(&A) + Send + Sync + 'static) -> u64 {
        self.push(event, Some(owner), false, std::sync::Arc::new(f))
    }

    /// Register a listener that fires at most once. Self-removal is atomic
    /// with dispatch: `emit` removes a fired `once` listener before calling
    /// the next one, so a concurrent `emit` can never observe it twice.
    pub fn once(&self, event: K, f: impl Fn(&A) + Send + Sync + 'static) -> u64 {
        self.push(event, None, true, std::sync::Arc::new(f))
    }

    pub fn once_owned(&self, event: K, owner: OwnerKey, f: impl Fn(&A) + Send + Sync + 'static) -> u64 {
        self.push(event, Some(owner), true, std::sync::Arc::new(f))
    }

    /// Remove a single listener by the id returned from `on`/`once`.
    pub fn remove(&self, event: &K, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(v) = inner.listeners.get_mut(event) {
            v.retain(|e| e.id != id);
        }
    }

    /// Remove every listener registered under `owner`, optionally scoped to
    /// a single event.
    pub fn remove_by_owner(&self, owner: OwnerKey, event: Option<&K>) {
        let mut inner = self.inner.lock().unwrap();
        match event {
            Some(ev) => {
                if let Some(v) = inner.listeners.get_mut(ev) {
                    v.retain(|e| e.owner != Some(owner));
                }
            }
            None => {
                for v in inner.listeners.values_mut() {
                    v.retain(|e| e.owner != Some(owner));
                }
            }
        }
    }

    /// Invoke every listener registered for `event`, in registration order,
    /// against a snapshot of ids taken at the start of this call. Listeners
    /// added mid-emit are not invoked this round; a listener removed before
    /// its turn is skipped; a `once` listener is removed right before it
    /// fires so re-entrant emits never see it twice.
    pub fn emit(&self, event: &K, arg: &A) {
        let snapshot: Vec<u64> = {
            let inner = self.inner.lock().unwrap();
            inner
                .listeners
                .get(event)
                .map(|v| v.iter().map(|e| e.id).collect())
                .unwrap_or_default()
        };

        for id in snapshot {
            let f = {
                let mut inner = self.inner.lock().unwrap();
                let Some(v) = inner.listeners.get_mut(event) else {
                    continue;
                };
                let Some(pos) = v.iter().position(|e| e.id == id) else {
                    continue; // removed before its turn
                };
                if v[pos].once {
                    v.remove(pos).f
                } else {
                    v[pos].f.clone()
                }
            };
            if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(arg))) {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                crate::diagnostics::report(crate::diagnostics::DiagnosticEvent::new(
                    "listener_panic",
                    format!("listener {id} panicked: {msg}"),
                ));
            }
        }
    }

    pub fn has_listeners(&self, event: &K) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.listeners.get(event).map(|v| !v.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn on_delivers_in_registration_order() {
        let d: EventDispatcher<&'static str, i32> = EventDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let log = log.clone();
            d.on("evt", move |v: &i32| log.lock().unwrap().push((n, *v)));
        }
        d.emit(&"evt", &42);
        assert_eq!(*log.lock().unwrap(), vec![(0, 42), (1, 42), (2, 42)]);
    }

    #[test]
    fn once_fires_at_most_once() {
        let d: EventDispatcher<&'static str, ()> = EventDispatcher::new();
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        d.once("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        d.emit(&"evt", &());
        d.emit(&"evt", &());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_by_owner_clears_all_events_for_that_owner() {
        let d: EventDispatcher<&'static str, ()> = EventDispatcher::new();
        let owner = new_owner_key();
        let hit = Arc::new(AtomicI32::new(0));
        let h = hit.clone();
        d.on_owned("a", owner, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = hit.clone();
        d.on_owned("b", owner, move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        });
        d.remove_by_owner(owner, None);
        d.emit(&"a", &());
        d.emit(&"b", &());
        assert_eq!(hit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_added_during_emit_is_not_called_this_round() {
        let d: Arc<EventDispatcher<&'static str, ()>> = Arc::new(EventDispatcher::new());
        let calls = Arc::new(AtomicI32::new(0));
        let d2 = d.clone();
        let calls2 = calls.clone();
        d.on("evt", move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
            let calls3 = calls2.clone();
            d2.on("evt", move |_| {
                calls3.fetch_add(100, Ordering::SeqCst);
            });
        });
        d.emit(&"evt", &());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        d.emit(&"evt", &());
        assert_eq!(calls.load(Ordering::SeqCst), 102);
    }
}
