//! The root registry: one per application.
//!
//! Owns the root state tree (store id to state slice), the live store
//! map, the plugin list, and the top-level disposal scope. Exactly one
//! registry is "active" per thread at a time; store accessors with no
//! explicit registry argument resolve against it.

use crate::reactive::{Cell, Scope};
use crate::store::{Binding, OptionsSnapshot, Store};
use indexmap::IndexMap;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Key under which an installed registry is provided to its application.
pub const REGISTRY_KEY: &str = "larder.registry";

/// One store's slot in the root state tree: field name to reactive cell.
pub type StateSlice = IndexMap<String, Cell>;

/// Extension properties a plugin merges onto a store under construction.
pub type Extensions = IndexMap<String, Binding>;

/// An extension point invoked once per store build, in registration
/// order. Whatever bindings it returns are merged onto the store and
/// listed as custom properties for inspection.
///
/// A plugin that panics during store construction aborts it; the panic
/// propagates to the caller resolving the store.
pub trait Plugin: Send + Sync {
    fn extend(&self, ctx: &PluginContext<'_>) -> Extensions;
}

impl<F> Plugin for F
where
    F: Fn(&PluginContext<'_>) -> Extensions + Send + Sync,
{
    fn extend(&self, ctx: &PluginContext<'_>) -> Extensions {
        self(ctx)
    }
}

/// What a plugin sees of the store being built.
pub struct PluginContext<'a> {
    pub store: &'a Arc<Store>,
    pub registry: &'a Arc<Registry>,
    pub options: &'a OptionsSnapshot,
}

/// Application-scoped container owning every store built under it.
///
/// Dispose it to stop the owner scope: every memo and watcher created by
/// any of its stores is severed transitively.
pub struct Registry {
    state: RwLock<IndexMap<String, StateSlice>>,
    stores: RwLock<HashMap<String, Arc<Store>>>,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    pending_plugins: Mutex<Vec<Arc<dyn Plugin>>>,
    scope: Scope,
    installed: AtomicBool,
}

thread_local! {
    static ACTIVE_STACK: RefCell<Vec<Arc<Registry>>> = const { RefCell::new(Vec::new()) };
}

static ACTIVE_FALLBACK: Mutex<Option<Arc<Registry>>> = Mutex::new(None);

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(IndexMap::new()),
            stores: RwLock::new(HashMap::new()),
            plugins: RwLock::new(Vec::new()),
            pending_plugins: Mutex::new(Vec::new()),
            scope: Scope::new(),
            installed: AtomicBool::new(false),
        })
    }

    /// Create a registry pre-populated from a serialized state tree.
    ///
    /// Store construction skips re-initializing state for identifiers
    /// already present, so resolving the same definitions against the
    /// new registry adopts the snapshot (hydration).
    pub fn with_state(snapshot: &Value) -> Arc<Self> {
        let registry = Self::new();
        if let Some(tree) = snapshot.as_object() {
            let mut state = registry.state.write().unwrap();
            for (id, slice_value) in tree {
                let Some(fields) = slice_value.as_object() else {
                    continue;
                };
                let mut slice = StateSlice::new();
                for (key, value) in fields {
                    slice.insert(key.clone(), Cell::new(value.clone()));
                }
                state.insert(id.clone(), slice);
            }
        }
        registry
    }

    /// Register a plugin.
    ///
    /// Plugins registered before [`install`](Self::install) are held back
    /// and flushed into the live list exactly once, at attachment time.
    pub fn use_plugin(self: &Arc<Self>, plugin: impl Plugin + 'static) -> &Arc<Self> {
        let plugin: Arc<dyn Plugin> = Arc::new(plugin);
        if self.installed.load(Ordering::SeqCst) {
            self.plugins.write().unwrap().push(plugin);
        } else {
            self.pending_plugins.lock().unwrap().push(plugin);
        }
        self
    }

    /// Attach the registry to a host application.
    ///
    /// Makes the registry active, provides it to the application under
    /// [`REGISTRY_KEY`], and flushes plugins registered before
    /// attachment.
    pub fn install(self: &Arc<Self>, app: &crate::host::App) {
        self.make_active();
        app.provide(REGISTRY_KEY, Arc::clone(self));
        self.installed.store(true, Ordering::SeqCst);

        let pending = std::mem::take(&mut *self.pending_plugins.lock().unwrap());
        if !pending.is_empty() {
            self.plugins.write().unwrap().extend(pending);
        }
    }

    /// Serialize the root state tree to a plain JSON tree keyed by store
    /// id, suitable for server-to-client state transfer.
    pub fn snapshot(&self) -> Value {
        let state = self.state.read().unwrap();
        let mut tree = serde_json::Map::new();
        for (id, slice) in state.iter() {
            let mut fields = serde_json::Map::new();
            for (key, cell) in slice {
                fields.insert(key.clone(), cell.peek());
            }
            tree.insert(id.clone(), Value::Object(fields));
        }
        Value::Object(tree)
    }

    /// Stop the owner scope and drop every store, plugin, and state
    /// slice. The registry cannot be used afterwards.
    pub fn dispose(&self) {
        self.scope.stop();
        let stores = std::mem::take(&mut *self.stores.write().unwrap());
        for store in stores.values() {
            store.mark_disposed();
        }
        self.plugins.write().unwrap().clear();
        self.pending_plugins.lock().unwrap().clear();
        self.state.write().unwrap().clear();
        debug!("registry disposed");
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        !self.scope.is_active()
    }

    /// The registry's owner scope.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    // --- active-registry resolution -------------------------------------

    /// Set this registry as the process-wide implicit fallback.
    ///
    /// Convenience for tests and non-component code; not safe across
    /// concurrent independent applications. Prefer passing a registry
    /// explicitly or using [`with_active`](Self::with_active).
    pub fn make_active(self: &Arc<Self>) {
        *ACTIVE_FALLBACK.lock().unwrap() = Some(Arc::clone(self));
    }

    /// Run a function with this registry as the current thread's active
    /// registry.
    pub fn with_active<R>(self: &Arc<Self>, f: impl FnOnce() -> R) -> R {
        ACTIVE_STACK.with(|stack| stack.borrow_mut().push(Arc::clone(self)));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        ACTIVE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// The registry implicit store accessors resolve against: the
    /// innermost [`with_active`](Self::with_active) scope on this thread,
    /// else the process-wide fallback.
    pub fn active() -> Option<Arc<Registry>> {
        let scoped = ACTIVE_STACK.with(|stack| stack.borrow().last().cloned());
        scoped.or_else(|| ACTIVE_FALLBACK.lock().unwrap().clone())
    }

    // --- root state tree ------------------------------------------------

    pub(crate) fn slice(&self, id: &str) -> Option<StateSlice> {
        self.state.read().unwrap().get(id).cloned()
    }

    pub(crate) fn has_slice(&self, id: &str) -> bool {
        self.state.read().unwrap().contains_key(id)
    }

    pub(crate) fn install_slice(&self, id: &str, slice: StateSlice) {
        self.state.write().unwrap().insert(id.to_owned(), slice);
    }

    pub(crate) fn slice_insert(&self, id: &str, key: &str, cell: Cell) {
        self.state
            .write()
            .unwrap()
            .entry(id.to_owned())
            .or_default()
            .insert(key.to_owned(), cell);
    }

    pub(crate) fn slice_remove_key(&self, id: &str, key: &str) {
        if let Some(slice) = self.state.write().unwrap().get_mut(id) {
            slice.shift_remove(key);
        }
    }

    pub(crate) fn remove_slice(&self, id: &str) {
        self.state.write().unwrap().shift_remove(id);
    }

    /// The current value of one store's state slice, as a plain object.
    pub fn slice_value(&self, id: &str) -> Option<Value> {
        let state = self.state.read().unwrap();
        let slice = state.get(id)?;
        let mut fields = serde_json::Map::new();
        for (key, cell) in slice {
            fields.insert(key.clone(), cell.peek());
        }
        Some(Value::Object(fields))
    }

    // --- store map ------------------------------------------------------

    /// The live store registered under `id`, if any.
    pub fn store(&self, id: &str) -> Option<Arc<Store>> {
        self.stores.read().unwrap().get(id).cloned()
    }

    /// Identifiers of every live store, sorted.
    pub fn store_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn insert_store(&self, id: &str, store: Arc<Store>) {
        self.stores.write().unwrap().insert(id.to_owned(), store);
    }

    pub(crate) fn remove_store(&self, id: &str) {
        self.stores.write().unwrap().remove(id);
    }

    pub(crate) fn plugins_snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_round_trips_through_with_state() {
        let registry = Registry::new();
        let mut slice = StateSlice::new();
        slice.insert("count".into(), Cell::new(json!(3)));
        slice.insert("name".into(), Cell::new(json!("larder")));
        registry.install_slice("counter", slice);

        let tree = registry.snapshot();
        assert_eq!(tree, json!({ "counter": { "count": 3, "name": "larder" } }));

        let restored = Registry::with_state(&tree);
        assert_eq!(restored.slice_value("counter"), Some(json!({ "count": 3, "name": "larder" })));
    }

    #[test]
    fn with_active_overrides_fallback_on_this_thread() {
        let outer = Registry::new();
        let inner = Registry::new();

        inner.with_active(|| {
            let active = Registry::active().unwrap();
            assert!(Arc::ptr_eq(&active, &inner));

            outer.with_active(|| {
                let nested = Registry::active().unwrap();
                assert!(Arc::ptr_eq(&nested, &outer));
            });
        });
    }

    #[test]
    fn install_flushes_pending_plugins_once() {
        let registry = Registry::new();
        registry.use_plugin(|_ctx: &PluginContext<'_>| Extensions::new());
        assert_eq!(registry.plugins.read().unwrap().len(), 0);

        let app = crate::host::App::new();
        registry.install(&app);
        assert_eq!(registry.plugins.read().unwrap().len(), 1);
        assert!(registry.pending_plugins.lock().unwrap().is_empty());

        // registered after attachment: goes live directly
        registry.use_plugin(|_ctx: &PluginContext<'_>| Extensions::new());
        assert_eq!(registry.plugins.read().unwrap().len(), 2);

        let injected = app
            .inject::<Registry>(REGISTRY_KEY)
            .expect("registry provided to app");
        assert!(Arc::ptr_eq(&injected, &registry));
    }

    #[test]
    fn dispose_clears_everything() {
        let registry = Registry::new();
        let mut slice = StateSlice::new();
        slice.insert("count".into(), Cell::new(json!(0)));
        registry.install_slice("counter", slice);

        registry.dispose();
        assert!(registry.is_disposed());
        assert_eq!(registry.snapshot(), json!({}));
        assert!(registry.store("counter").is_none());
    }
}
