use crate::runtime::ReactiveRuntime;
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Change sink installed on a cell when it joins a store's state slice.
/// Receives the old and new value of every write.
pub(crate) type ChangeSink = Arc<dyn Fn(Value, Value) + Send + Sync>;

/// An atomic mutable reactive container holding one state value.
///
/// Reads are tracked against the current observer (a recomputing memo) so
/// derived values invalidate when the cell changes. A store installs a
/// change sink on each cell of its state slice; the sink is how direct
/// field mutation reaches the store's subscription machinery.
///
/// Clones share the same underlying value and identity; the cell a store
/// exposes and the entry in the registry's root state tree are the same
/// reactive cell, not copies.
#[derive(Clone)]
pub struct Cell {
    id: usize,
    value: Arc<RwLock<Value>>,
    sink: Arc<RwLock<Option<ChangeSink>>>,
    runtime: Arc<ReactiveRuntime>,
}

impl Cell {
    /// Create a new cell with the given initial value.
    pub fn new(initial: Value) -> Self {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        Self {
            id,
            value: Arc::new(RwLock::new(initial)),
            sink: Arc::new(RwLock::new(None)),
            runtime,
        }
    }

    /// Get the current value, tracking the read.
    pub fn get(&self) -> Value {
        self.runtime.track_read(self.id);
        self.value.read().unwrap().clone()
    }

    /// Read the current value without tracking.
    pub fn peek(&self) -> Value {
        self.value.read().unwrap().clone()
    }

    /// Set a new value, invalidating dependents and notifying the sink.
    pub fn set(&self, new_value: Value) {
        let old = {
            let mut value = self.value.write().unwrap();
            std::mem::replace(&mut *value, new_value.clone())
        };
        self.runtime.notify_observers(self.id);
        self.notify_sink(old, new_value);
    }

    /// Update the value in place with a function.
    pub fn update(&self, f: impl FnOnce(&mut Value)) {
        let (old, new) = {
            let mut value = self.value.write().unwrap();
            let old = value.clone();
            f(&mut value);
            (old, value.clone())
        };
        self.runtime.notify_observers(self.id);
        self.notify_sink(old, new);
    }

    /// The cell's unique ID within its runtime.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether two handles refer to the same reactive cell.
    pub fn same_identity(&self, other: &Cell) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }

    pub(crate) fn install_sink(&self, sink: ChangeSink) {
        *self.sink.write().unwrap() = Some(sink);
    }

    pub(crate) fn clear_sink(&self) {
        *self.sink.write().unwrap() = None;
    }

    fn notify_sink(&self, old: Value, new: Value) {
        let sink = self.sink.read().unwrap().clone();
        if let Some(sink) = sink {
            sink(old, new);
        }
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("value", &*self.value.read().unwrap())
            .finish()
    }
}
