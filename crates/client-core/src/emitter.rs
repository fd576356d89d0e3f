//! A named event dispatcher.
//!
//! Listeners are registered under an event name and identified by the [`ListenerKey`] returned
//! at registration. [`Emitter::emit`] dispatches to a snapshot of the listeners taken before
//! the first call, so a listener may register, remove or emit on the same emitter.
//!
//! ```
//! # use socketioxide_client_core::{Emitter, Value};
//! # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! let emitter = Emitter::default();
//! let count = Arc::new(AtomicUsize::new(0));
//! let c = count.clone();
//! emitter.once("connect", move |_| {
//!     c.fetch_add(1, Ordering::SeqCst);
//! });
//! emitter.emit("connect", &[]);
//! emitter.emit("connect", &[]);
//! assert_eq!(count.load(Ordering::SeqCst), 1);
//! ```
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::value::Value;

/// A listener callback.
pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(u64);

struct Entry {
    key: ListenerKey,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Inner {
    next_key: u64,
    listeners: HashMap<String, Vec<Entry>>,
}

/// A named event dispatcher. See the [module docs](self).
#[derive(Default)]
pub struct Emitter {
    inner: Mutex<Inner>,
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        let mut events: Vec<_> = inner
            .listeners
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.len()))
            .collect();
        events.sort_unstable();
        f.debug_struct("Emitter").field("events", &events).finish()
    }
}

impl Emitter {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking listener never runs with the lock held.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, event: &str, once: bool, listener: Listener) -> ListenerKey {
        let mut inner = self.lock();
        let key = ListenerKey(inner.next_key);
        inner.next_key += 1;
        inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Entry {
                key,
                once,
                listener,
            });
        key
    }

    /// Register a listener for `event`.
    pub fn on<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.register(event, false, Arc::new(listener))
    }

    /// Register a listener that is removed right before its first call.
    pub fn once<F>(&self, event: &str, listener: F) -> ListenerKey
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.register(event, true, Arc::new(listener))
    }

    /// Remove the listener registered under `key`. Returns false if it was not found.
    pub fn off(&self, event: &str, key: ListenerKey) -> bool {
        let mut inner = self.lock();
        let Some(entries) = inner.listeners.get_mut(event) else {
            return false;
        };
        let len = entries.len();
        entries.retain(|e| e.key != key);
        let removed = entries.len() != len;
        if entries.is_empty() {
            inner.listeners.remove(event);
        }
        removed
    }

    /// Remove every listener of `event`.
    pub fn off_event(&self, event: &str) {
        self.lock().listeners.remove(event);
    }

    /// Remove every listener.
    pub fn off_all(&self) {
        self.lock().listeners.clear();
    }

    /// Call every listener of `event` with `args`, in registration order.
    ///
    /// Returns the number of listeners called.
    pub fn emit(&self, event: &str, args: &[Value]) -> usize {
        let snapshot: Vec<Listener> = {
            let mut inner = self.lock();
            let Some(entries) = inner.listeners.get_mut(event) else {
                return 0;
            };
            let snapshot = entries.iter().map(|e| e.listener.clone()).collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                inner.listeners.remove(event);
            }
            snapshot
        };
        for listener in &snapshot {
            listener(args);
        }
        snapshot.len()
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().listeners.get(event).map_or(0, Vec::len)
    }

    /// Returns true if at least one listener is registered for `event`.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&[Value]) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &[Value]| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn on_off() {
        let emitter = Emitter::default();
        let (count, f) = counter();
        let key = emitter.on("message", f);
        assert_eq!(emitter.emit("message", &[]), 1);
        assert!(emitter.off("message", key));
        assert!(!emitter.off("message", key));
        assert_eq!(emitter.emit("message", &[]), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn args_are_forwarded() {
        let emitter = Emitter::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        emitter.on("data", move |args| s.lock().unwrap().extend_from_slice(args));
        emitter.emit("data", &["a".into(), 2.into()]);
        assert_eq!(*seen.lock().unwrap(), vec![Value::from("a"), Value::Int(2)]);
    }

    #[test]
    fn listener_can_mutate_emitter() {
        let emitter = Arc::new(Emitter::default());
        let (count, f) = counter();
        let f = Arc::new(f);
        let e = emitter.clone();
        emitter.on("add", move |_| {
            let f = f.clone();
            e.on("add", move |args| (*f)(args));
        });
        // The listener added during the first dispatch is not part of its snapshot.
        emitter.emit("add", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count("add"), 2);
        emitter.emit("add", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_remove_itself() {
        let emitter = Arc::new(Emitter::default());
        let (count, f) = counter();
        let key = Arc::new(Mutex::new(None));
        let (e, k) = (emitter.clone(), key.clone());
        let registered = emitter.on("tick", move |args| {
            f(args);
            if let Some(key) = *k.lock().unwrap() {
                e.off("tick", key);
            }
        });
        *key.lock().unwrap() = Some(registered);
        emitter.emit("tick", &[]);
        emitter.emit("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!emitter.has_listeners("tick"));
    }

    #[test]
    fn off_event_and_all() {
        let emitter = Emitter::default();
        emitter.on("a", |_| {});
        emitter.on("a", |_| {});
        emitter.on("b", |_| {});
        emitter.off_event("a");
        assert_eq!(emitter.listener_count("a"), 0);
        assert_eq!(emitter.listener_count("b"), 1);
        emitter.off_all();
        assert!(!emitter.has_listeners("b"));
    }
}
