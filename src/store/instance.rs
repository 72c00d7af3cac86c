//! The live store: an explicit slot map of state cells, getters, actions,
//! and opaque values, plus the mutation and interception machinery.

use crate::error::LarderError;
use crate::reactive::{Cell, Memo, Scope};
use crate::registry::Registry;
use crate::runtime::scheduler;
use crate::store::action::{
    Action, ActionCall, ActionListener, ActionValue, AfterFn, ErrorFn,
};
use crate::store::definition::{GetterFn, OpaqueValue, StateFactory, StoreFlavor};
use crate::store::merge::merge_values;
use crate::subscriptions::{trigger_isolated, SubscriptionHandle, Subscriptions};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::debug;

/// One installed member of a store.
#[derive(Clone)]
pub enum Slot {
    State(Cell),
    Getter(Memo<Value>),
    Action(Action),
    Opaque(OpaqueValue),
}

/// How the state changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// A single field written outside any patch.
    Direct,
    /// A `patch` call with a partial-state object.
    PatchObject,
    /// A `patch_with` call with a mutator function.
    PatchFunction,
}

/// One field-level change, in write order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub key: String,
    pub old: Value,
    pub new: Value,
}

/// Delivered to state subscribers: what kind of write happened, the patch
/// payload when there was one, and the per-field events it produced.
#[derive(Clone, Debug)]
pub struct Mutation {
    pub store_id: String,
    pub kind: MutationKind,
    pub payload: Option<Value>,
    pub events: Vec<ChangeEvent>,
}

/// When a state subscription fires relative to the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Flush {
    /// Batched: direct writes between two scheduler ticks coalesce into
    /// one notification.
    #[default]
    Deferred,
    /// Immediately on every direct write.
    Sync,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SubscribeOptions {
    /// Keep the subscription alive past the registering component's
    /// teardown.
    pub detached: bool,
    pub flush: Flush,
}

pub(crate) struct SubEntry {
    flush: Flush,
    callback: Box<dyn Fn(&Mutation, &Value) + Send + Sync>,
}

/// A built store instance. Obtained from [`StoreDefinition::get`]
/// (singleton per registry) and shared as `Arc<Store>`.
///
/// [`StoreDefinition::get`]: crate::store::definition::StoreDefinition::get
pub struct Store {
    id: String,
    flavor: StoreFlavor,
    registry: Weak<Registry>,
    scope: Scope,
    slots: RwLock<IndexMap<String, Slot>>,
    subscriptions: Subscriptions<SubEntry>,
    action_subscriptions: Subscriptions<ActionListener>,
    // Direct-write notification gating. `listening` covers deferred
    // delivery, `sync_listening` the immediate path; both drop during a
    // patch so per-cell writes inside it stay silent.
    listening: AtomicBool,
    sync_listening: AtomicBool,
    // Deferred re-enable token: only the job queued by the *latest* patch
    // may flip `listening` back on, so overlapping patches cannot re-open
    // the gate early.
    patch_serial: AtomicU64,
    active_patch: AtomicU64,
    pending_events: Mutex<Vec<ChangeEvent>>,
    deferred_scheduled: AtomicBool,
    custom_properties: Mutex<BTreeSet<String>>,
    reset_factory: Option<StateFactory>,
    raw_getters: RwLock<IndexMap<String, GetterFn>>,
    hot_swapping: AtomicBool,
    disposed: AtomicBool,
}

impl Store {
    pub(crate) fn new_partial(
        id: &str,
        flavor: StoreFlavor,
        registry: &Arc<Registry>,
        scope: Scope,
        reset_factory: Option<StateFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            flavor,
            registry: Arc::downgrade(registry),
            scope,
            slots: RwLock::new(IndexMap::new()),
            subscriptions: Subscriptions::new(),
            action_subscriptions: Subscriptions::new(),
            listening: AtomicBool::new(false),
            sync_listening: AtomicBool::new(false),
            patch_serial: AtomicU64::new(0),
            active_patch: AtomicU64::new(0),
            pending_events: Mutex::new(Vec::new()),
            deferred_scheduled: AtomicBool::new(false),
            custom_properties: Mutex::new(BTreeSet::new()),
            reset_factory,
            raw_getters: RwLock::new(IndexMap::new()),
            hot_swapping: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    /// The store's unique id within its registry.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this store came from an options or a setup definition.
    pub fn flavor(&self) -> StoreFlavor {
        self.flavor
    }

    /// The registry this store belongs to, if still alive.
    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.registry.upgrade()
    }

    /// Whether the store has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    // --- reading ---------------------------------------------------------

    /// Read a state field or getter. Tracked: calling this inside a memo
    /// computation records a dependency.
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.slots.read().unwrap().get(key).cloned()?;
        match slot {
            Slot::State(cell) => Some(cell.get()),
            Slot::Getter(memo) => Some(memo.get()),
            Slot::Action(_) | Slot::Opaque(_) => None,
        }
    }

    /// Read and deserialize a state field or getter.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        serde_json::from_value(self.get(key)?).ok()
    }

    /// Fetch an opaque slot.
    pub fn opaque(&self, key: &str) -> Option<OpaqueValue> {
        match self.slots.read().unwrap().get(key)? {
            Slot::Opaque(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Snapshot the full state object, untracked, in field order.
    pub fn state(&self) -> Value {
        let slots = self.slots.read().unwrap();
        let mut out = Map::new();
        for (key, slot) in slots.iter() {
            if let Slot::State(cell) = slot {
                out.insert(key.clone(), cell.peek());
            }
        }
        Value::Object(out)
    }

    // --- writing ---------------------------------------------------------

    /// Write one state field directly. Creates the field if the store
    /// does not have it yet.
    pub fn set(self: &Arc<Self>, key: &str, value: Value) {
        self.field_cell(key).set(value);
    }

    /// Replace the state wholesale, as one mutator patch. Keys absent from
    /// `new_state` keep their current value.
    pub fn set_state(self: &Arc<Self>, new_state: &Value) {
        let new_state = new_state.clone();
        self.patch_with(move |state| {
            if let Some(obj) = new_state.as_object() {
                for (key, value) in obj {
                    state.set(key, value.clone());
                }
            }
        });
    }

    /// Apply a partial-state object as a single batched mutation.
    ///
    /// Object-valued fields deep-merge with the patch; everything else is
    /// replaced. Subscribers see one notification carrying every
    /// field-level event, regardless of flush mode.
    ///
    /// Patching the same store again from inside a mutator or subscriber
    /// of this patch is undefined behavior.
    pub fn patch(self: &Arc<Self>, partial: Value) {
        self.begin_quiet();
        if let Some(obj) = partial.as_object() {
            for (key, sub) in obj {
                let cell = self.field_cell(key);
                cell.update(|value| merge_values(value, sub));
            }
        }
        let events = std::mem::take(&mut *self.pending_events.lock().unwrap());
        self.finish_patch(Mutation {
            store_id: self.id.clone(),
            kind: MutationKind::PatchObject,
            payload: Some(partial),
            events,
        });
    }

    /// Apply arbitrary writes through a mutator as a single batched
    /// mutation.
    pub fn patch_with(self: &Arc<Self>, mutator: impl FnOnce(&PatchState<'_>)) {
        self.begin_quiet();
        mutator(&PatchState { store: self });
        let events = std::mem::take(&mut *self.pending_events.lock().unwrap());
        self.finish_patch(Mutation {
            store_id: self.id.clone(),
            kind: MutationKind::PatchFunction,
            payload: None,
            events,
        });
    }

    /// Re-run the state factory and assign the fresh state as one patch.
    /// Only options stores carry a factory; setup stores refuse.
    pub fn reset(self: &Arc<Self>) -> Result<(), LarderError> {
        let factory = match (self.flavor, self.reset_factory.as_ref()) {
            (StoreFlavor::Options, Some(factory)) => Arc::clone(factory),
            _ => {
                return Err(LarderError::SetupStoreReset {
                    id: self.id.clone(),
                })
            }
        };
        let fresh = factory();
        self.patch_with(move |state| {
            if let Some(obj) = fresh.as_object() {
                for (key, value) in obj {
                    state.set(key, value.clone());
                }
            }
        });
        Ok(())
    }

    fn begin_quiet(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.sync_listening.store(false, Ordering::SeqCst);
        self.pending_events.lock().unwrap().clear();
    }

    fn finish_patch(self: &Arc<Self>, mutation: Mutation) {
        // Deferred re-enable mirrors the direct-write flush timing: writes
        // queued by reactions to this patch still coalesce into it.
        let token = self.patch_serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_patch.store(token, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        scheduler::defer(move || {
            if let Some(store) = weak.upgrade() {
                if store.active_patch.load(Ordering::SeqCst) == token {
                    store.listening.store(true, Ordering::SeqCst);
                }
            }
        });
        self.sync_listening.store(true, Ordering::SeqCst);

        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let state = self.state();
        // a patch notifies every subscriber once, whatever its flush mode
        self.subscriptions
            .trigger(|entry| (entry.callback)(&mutation, &state));
    }

    // --- subscriptions ---------------------------------------------------

    /// Observe state mutations. The callback receives the mutation
    /// descriptor and a snapshot of the state after it.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Mutation, &Value) + Send + Sync + 'static,
        options: SubscribeOptions,
    ) -> SubscriptionHandle {
        self.subscriptions.add(
            Arc::new(SubEntry {
                flush: options.flush,
                callback: Box::new(callback),
            }),
            options.detached,
            || {},
        )
    }

    /// Observe action calls before their body runs. Listeners may attach
    /// `after` and `on_error` continuations per call.
    pub fn on_action(
        &self,
        listener: impl for<'a> Fn(&ActionCall<'a>) + Send + Sync + 'static,
        detached: bool,
    ) -> SubscriptionHandle {
        let listener: Arc<ActionListener> = Arc::new(listener);
        self.action_subscriptions.add(listener, detached, || {})
    }

    // --- actions ---------------------------------------------------------

    /// Invoke an installed action by name through the interception
    /// pipeline.
    pub fn call(self: &Arc<Self>, name: &str, args: &[Value]) -> anyhow::Result<ActionValue> {
        let action = match self.slots.read().unwrap().get(name) {
            Some(Slot::Action(action)) => action.clone(),
            _ => {
                return Err(LarderError::UnknownAction {
                    id: self.id.clone(),
                    name: name.to_owned(),
                }
                .into())
            }
        };
        self.run_action(&action, args)
    }

    pub(crate) fn run_action(
        self: &Arc<Self>,
        action: &Action,
        args: &[Value],
    ) -> anyhow::Result<ActionValue> {
        // actions resolving nested stores see this store's registry
        if let Some(registry) = self.registry.upgrade() {
            registry.make_active();
        }

        let after: Mutex<Vec<AfterFn>> = Mutex::new(Vec::new());
        let on_error: Mutex<Vec<ErrorFn>> = Mutex::new(Vec::new());
        let name = action.name();
        {
            let call = ActionCall::new(&name, args, self, &after, &on_error);
            self.action_subscriptions.trigger(|listener| listener(&call));
        }

        match (action.body())(self, args) {
            Err(error) => {
                let callbacks = on_error.into_inner().unwrap();
                trigger_isolated(&callbacks, |cb| cb(&error));
                Err(error)
            }
            Ok(ActionValue::Ready(value)) => {
                let callbacks = after.into_inner().unwrap();
                trigger_isolated(&callbacks, |cb| cb(&value));
                Ok(ActionValue::Ready(value))
            }
            Ok(ActionValue::Pending(pending)) => {
                // listener continuations attach first, in listener order
                for callback in after.into_inner().unwrap() {
                    pending.on_resolve_arc(callback);
                }
                for callback in on_error.into_inner().unwrap() {
                    pending.on_reject_arc(callback);
                }
                Ok(ActionValue::Pending(pending))
            }
        }
    }

    // --- teardown --------------------------------------------------------

    /// Stop the store's reactive scope, drop all subscriptions, and remove
    /// the store and its state slice from the registry. The next `get`
    /// for this id builds a fresh instance with fresh state.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scope.stop();
        self.subscriptions.clear();
        self.action_subscriptions.clear();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_store(&self.id);
            registry.remove_slice(&self.id);
        }
        debug!(store = %self.id, "store disposed");
    }

    /// Registry-side teardown: the registry scope cascade already stopped
    /// our scope and the registry clears its own maps.
    pub(crate) fn mark_disposed(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.clear();
        self.action_subscriptions.clear();
    }

    // --- slot plumbing ---------------------------------------------------

    /// Install a state cell: slot entry, shared slice entry, and the write
    /// sink that feeds subscription delivery.
    pub(crate) fn install_state_cell(self: &Arc<Self>, key: &str, cell: &Cell) {
        let weak = Arc::downgrade(self);
        let sink_key = key.to_owned();
        cell.install_sink(Arc::new(move |old, new| {
            if let Some(store) = weak.upgrade() {
                store.on_cell_write(&sink_key, old, new);
            }
        }));
        self.slots
            .write()
            .unwrap()
            .insert(key.to_owned(), Slot::State(cell.clone()));
        if let Some(registry) = self.registry.upgrade() {
            registry.slice_insert(&self.id, key, cell.clone());
        }
    }

    pub(crate) fn insert_slot(&self, key: &str, slot: Slot) {
        self.slots.write().unwrap().insert(key.to_owned(), slot);
    }

    pub(crate) fn slot(&self, key: &str) -> Option<Slot> {
        self.slots.read().unwrap().get(key).cloned()
    }

    pub(crate) fn slots_snapshot(&self) -> IndexMap<String, Slot> {
        self.slots.read().unwrap().clone()
    }

    pub(crate) fn remove_slot(&self, key: &str) {
        self.slots.write().unwrap().shift_remove(key);
    }

    pub(crate) fn remove_state_slot(&self, key: &str) {
        self.remove_slot(key);
        if let Some(registry) = self.registry.upgrade() {
            registry.slice_remove_key(&self.id, key);
        }
    }

    /// Whether `key` names a state field.
    pub fn has_state(&self, key: &str) -> bool {
        matches!(self.slots.read().unwrap().get(key), Some(Slot::State(_)))
    }

    /// State field names, in installation order.
    pub fn state_keys(&self) -> Vec<String> {
        self.keys_matching(|slot| matches!(slot, Slot::State(_)))
    }

    /// Getter names, in installation order.
    pub fn getter_names(&self) -> Vec<String> {
        self.keys_matching(|slot| matches!(slot, Slot::Getter(_)))
    }

    /// Action names, in installation order.
    pub fn action_names(&self) -> Vec<String> {
        self.keys_matching(|slot| matches!(slot, Slot::Action(_)))
    }

    fn keys_matching(&self, pred: impl Fn(&Slot) -> bool) -> Vec<String> {
        self.slots
            .read()
            .unwrap()
            .iter()
            .filter(|(_, slot)| pred(slot))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Names of members contributed by plugins.
    pub fn custom_property_names(&self) -> Vec<String> {
        self.custom_properties
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    pub(crate) fn add_custom_property(&self, key: &str) {
        self.custom_properties.lock().unwrap().insert(key.to_owned());
    }

    pub(crate) fn set_raw_getters(&self, getters: IndexMap<String, GetterFn>) {
        *self.raw_getters.write().unwrap() = getters;
    }

    pub(crate) fn raw_getters(&self) -> IndexMap<String, GetterFn> {
        self.raw_getters.read().unwrap().clone()
    }

    pub(crate) fn start_listening(&self) {
        // construction-time writes (hydration hooks, plugins) are not
        // mutations
        self.pending_events.lock().unwrap().clear();
        self.listening.store(true, Ordering::SeqCst);
        self.sync_listening.store(true, Ordering::SeqCst);
    }

    pub(crate) fn begin_hot_swap(&self) {
        self.hot_swapping.store(true, Ordering::SeqCst);
        self.begin_quiet();
    }

    pub(crate) fn end_hot_swap(self: &Arc<Self>) {
        self.hot_swapping.store(false, Ordering::SeqCst);
        self.pending_events.lock().unwrap().clear();
        let token = self.patch_serial.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_patch.store(token, Ordering::SeqCst);
        let weak = Arc::downgrade(self);
        scheduler::defer(move || {
            if let Some(store) = weak.upgrade() {
                if store.active_patch.load(Ordering::SeqCst) == token {
                    store.listening.store(true, Ordering::SeqCst);
                }
            }
        });
        self.sync_listening.store(true, Ordering::SeqCst);
    }

    // --- direct-write delivery -------------------------------------------

    fn field_cell(self: &Arc<Self>, key: &str) -> Cell {
        if let Some(Slot::State(cell)) = self.slots.read().unwrap().get(key) {
            return cell.clone();
        }
        let cell = Cell::new(Value::Null);
        self.install_state_cell(key, &cell);
        cell
    }

    fn on_cell_write(self: &Arc<Self>, key: &str, old: Value, new: Value) {
        if self.hot_swapping.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let event = ChangeEvent {
            key: key.to_owned(),
            old,
            new,
        };
        self.pending_events.lock().unwrap().push(event.clone());

        if self.sync_listening.load(Ordering::SeqCst) {
            let mutation = Mutation {
                store_id: self.id.clone(),
                kind: MutationKind::Direct,
                payload: None,
                events: vec![event],
            };
            let state = self.state();
            self.subscriptions.trigger(|entry| {
                if entry.flush == Flush::Sync {
                    (entry.callback)(&mutation, &state);
                }
            });
        }

        if !self.deferred_scheduled.swap(true, Ordering::SeqCst) {
            let weak = Arc::downgrade(self);
            scheduler::defer(move || {
                if let Some(store) = weak.upgrade() {
                    store.flush_deferred();
                }
            });
        }
    }

    fn flush_deferred(&self) {
        self.deferred_scheduled.store(false, Ordering::SeqCst);
        let events = std::mem::take(&mut *self.pending_events.lock().unwrap());
        if events.is_empty()
            || !self.listening.load(Ordering::SeqCst)
            || self.disposed.load(Ordering::SeqCst)
        {
            return;
        }
        let mutation = Mutation {
            store_id: self.id.clone(),
            kind: MutationKind::Direct,
            payload: None,
            events,
        };
        let state = self.state();
        self.subscriptions.trigger(|entry| {
            if entry.flush == Flush::Deferred {
                (entry.callback)(&mutation, &state);
            }
        });
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("flavor", &self.flavor)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Write access handed to a `patch_with` mutator.
pub struct PatchState<'a> {
    store: &'a Arc<Store>,
}

impl PatchState<'_> {
    /// The current value of a state field.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.store.slot(key) {
            Some(Slot::State(cell)) => Some(cell.peek()),
            _ => None,
        }
    }

    /// Overwrite a state field, creating it if missing.
    pub fn set(&self, key: &str, value: Value) {
        self.store.field_cell(key).set(value);
    }

    /// Modify a state field in place.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut Value)) {
        self.store.field_cell(key).update(f);
    }
}
