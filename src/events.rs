//! Observer channels for engine events
//!
//! Each channel keeps its handlers in registration order. Triggering works on
//! a snapshot of the handler list, so a handler may unsubscribe itself (or any
//! other handler) while an event is being delivered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::lock::mutex_lock;

const SOURCE: &str = "events";

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Handlers<T> = Mutex<BTreeMap<u64, Handler<T>>>;

/// A list of handlers for one kind of event
pub struct EventHook<T: ?Sized> {
    handlers: Arc<Handlers<T>>,
    next_id: AtomicU64,
}

impl<T: ?Sized + 'static> EventHook<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Registers a handler, returning the handle that removes it again
    pub fn on<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.handlers, SOURCE, "on").insert(id, Arc::new(handler));

        let handlers: Weak<Handlers<T>> = Arc::downgrade(&self.handlers);
        Subscription {
            id,
            remove: Box::new(move |id| {
                if let Some(handlers) = handlers.upgrade() {
                    mutex_lock(&handlers, SOURCE, "unsubscribe").remove(&id);
                }
            }),
        }
    }

    /// Calls every handler registered at the time of the call
    pub fn trigger(&self, payload: &T) {
        let snapshot: Vec<Handler<T>> = mutex_lock(&self.handlers, SOURCE, "trigger")
            .values()
            .cloned()
            .collect();

        for handler in snapshot {
            handler(payload);
        }
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        mutex_lock(&self.handlers, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + 'static> Default for EventHook<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for EventHook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHook")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Handle returned by [`EventHook::on`]
///
/// Dropping the handle keeps the handler registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    id: u64,
    remove: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.remove)(self.id);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
