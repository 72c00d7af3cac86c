//! Generic ordered-callback registry.
//!
//! One mechanism backs both state-change subscriptions and action
//! listeners: callbacks fire in registration order, a triggering pass
//! iterates a snapshot so additions and removals during the pass do not
//! affect it, and a panicking callback cannot starve the ones after it.

use crate::host::ComponentLifetime;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

struct Entry<F: ?Sized> {
    id: u64,
    callback: Arc<F>,
}

/// An ordered list of callbacks with handle-based removal.
pub struct Subscriptions<F: ?Sized> {
    entries: Arc<RwLock<Vec<Entry<F>>>>,
    next_id: AtomicU64,
}

impl<F: ?Sized + Send + Sync + 'static> Subscriptions<F> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Append a callback and return a removal handle.
    ///
    /// Unless `detached`, a registration made inside a component's active
    /// lifetime is bound to it: component teardown unsubscribes the
    /// callback and runs `on_cleanup` once.
    pub fn add(
        &self,
        callback: Arc<F>,
        detached: bool,
        on_cleanup: impl FnOnce() + Send + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.write().unwrap().push(Entry { id, callback });

        let entries = Arc::downgrade(&self.entries);
        let handle = SubscriptionHandle::new(
            move || {
                if let Some(entries) = entries.upgrade() {
                    entries.write().unwrap().retain(|entry| entry.id != id);
                }
            },
            on_cleanup,
        );

        if !detached {
            if let Some(lifetime) = ComponentLifetime::current() {
                let bound = handle.clone();
                lifetime.on_teardown(move || bound.unsubscribe());
            }
        }

        handle
    }

    /// Invoke every callback registered at call time, in order.
    pub fn trigger(&self, invoke: impl Fn(&F)) {
        let snapshot: Vec<Arc<F>> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        trigger_isolated(&snapshot, invoke);
    }

    /// Drop every callback.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: ?Sized + Send + Sync + 'static> Default for Subscriptions<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke callbacks in order, isolating each call: a panic does not stop
/// the pass, and the first captured panic is resumed once the pass ends.
pub(crate) fn trigger_isolated<F: ?Sized>(callbacks: &[Arc<F>], invoke: impl Fn(&F)) {
    let mut first_panic = None;
    for callback in callbacks {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| invoke(callback))) {
            first_panic.get_or_insert(panic);
        }
    }
    if let Some(panic) = first_panic {
        resume_unwind(panic);
    }
}

/// Removes exactly one subscription when called; calling twice is a no-op.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    removed: AtomicBool,
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl SubscriptionHandle {
    fn new(remove: impl FnOnce() + Send + 'static, cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                removed: AtomicBool::new(false),
                remove: Mutex::new(Some(Box::new(remove))),
                cleanup: Mutex::new(Some(Box::new(cleanup))),
            }),
        }
    }

    /// Remove the subscription and run its cleanup, once.
    pub fn unsubscribe(&self) {
        if !self.inner.removed.swap(true, Ordering::SeqCst) {
            if let Some(remove) = self.inner.remove.lock().unwrap().take() {
                remove();
            }
            if let Some(cleanup) = self.inner.cleanup.lock().unwrap().take() {
                cleanup();
            }
        }
    }

    /// Whether the subscription is still registered.
    pub fn is_active(&self) -> bool {
        !self.inner.removed.load(Ordering::SeqCst)
    }
}
