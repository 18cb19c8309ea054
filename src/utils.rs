use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Copy-on-write set of listeners.
///
/// Fan-out iterates a snapshot, so listeners can be added or removed (also
/// from inside a callback) while a notification is in progress. A listener
/// removed before a snapshot was taken never sees that notification.
/// Identity is the allocation behind the `Arc`.
pub(crate) struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Returns `false` if the listener was already registered.
    pub(crate) fn insert(&self, listener: Arc<T>) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        let mut next = Vec::with_capacity(listeners.len() + 1);
        next.extend(listeners.iter().cloned());
        next.push(listener);
        *listeners = Arc::new(next);
        true
    }

    /// Returns `false` if the listener was not registered.
    pub(crate) fn remove(&self, listener: &Arc<T>) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| same_listener(l, listener)) {
            return false;
        }
        let next = listeners
            .iter()
            .filter(|l| !same_listener(l, listener))
            .cloned()
            .collect();
        *listeners = Arc::new(next);
        true
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.listeners.lock().unwrap().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

// compares data pointers only, vtable pointers of the same type may differ
// between codegen units
fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Seconds since the unix epoch, `window` from now.
pub(crate) fn unix_time_after(window: Duration) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (now + window).as_secs() as i64
}
