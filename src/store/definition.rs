//! Store definitions: the declarative (options) and imperative (setup)
//! ways of describing a store, and the tagged bindings both lower into.

use crate::error::LarderError;
use crate::host::ComponentLifetime;
use crate::reactive::{Cell, Memo};
use crate::registry::{Registry, REGISTRY_KEY};
use crate::store::action::{Action, ActionValue};
use crate::store::build;
use crate::store::instance::Store;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// How a store was defined. Options stores support `reset`; setup stores
/// do not carry a state factory and refuse it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreFlavor {
    Options,
    Setup,
}

/// Computes a derived value from the store. Reads through the store are
/// tracked, so the backing memo recomputes when its inputs change.
pub type GetterFn = Arc<dyn Fn(&Arc<Store>) -> Value + Send + Sync>;

/// Produces a fresh initial state object.
pub type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Custom hydration hook for options stores; receives the store and the
/// snapshot slice captured before construction.
pub type HydrateHook = Arc<dyn Fn(&Arc<Store>, &Value) + Send + Sync>;

/// A non-state, non-reactive value exposed on a store as-is.
pub type OpaqueValue = Arc<dyn Any + Send + Sync>;

/// One exported member of a store, tagged by role.
#[derive(Clone)]
pub enum Binding {
    /// A reactive state field. `hydrate` is cleared by
    /// [`SetupBindings::state_skip_hydrate`] to keep snapshot values out.
    State { cell: Cell, hydrate: bool },
    /// A cached derived value.
    Getter(Memo<Value>),
    /// An interceptable function.
    Action(Action),
    /// Anything else; carried through untouched and invisible to
    /// serialization.
    Opaque(OpaqueValue),
}

/// The declarative shape of an options store.
#[derive(Clone)]
pub struct OptionsDef {
    pub(crate) state: StateFactory,
    pub(crate) actions: IndexMap<String, Action>,
    pub(crate) getters: IndexMap<String, GetterFn>,
    pub(crate) hydrate: Option<HydrateHook>,
}

impl OptionsDef {
    /// Begin a definition from a state factory. The factory must return a
    /// JSON object; each top-level key becomes a reactive field.
    pub fn new(state: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(state),
            actions: IndexMap::new(),
            getters: IndexMap::new(),
            hydrate: None,
        }
    }

    /// Declare an action.
    pub fn action(
        mut self,
        name: &str,
        body: impl Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync + 'static,
    ) -> Self {
        self.actions.insert(name.to_owned(), Action::named(name, body));
        self
    }

    /// Declare a getter.
    pub fn getter(
        mut self,
        name: &str,
        getter: impl Fn(&Arc<Store>) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.getters.insert(name.to_owned(), Arc::new(getter));
        self
    }

    /// Replace the default snapshot hydration with a custom hook.
    pub fn on_hydrate(mut self, hook: impl Fn(&Arc<Store>, &Value) + Send + Sync + 'static) -> Self {
        self.hydrate = Some(Arc::new(hook));
        self
    }
}

/// Handed to a setup function; the construction-side API for minting
/// bindings.
pub struct SetupContext {
    _private: (),
}

impl SetupContext {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Wrap a function body as an interceptable action. The builder names
    /// it after the key it is exported under.
    pub fn action(
        &self,
        body: impl Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync + 'static,
    ) -> Action {
        Action::new(body)
    }
}

/// The ordered exports of a setup function.
#[derive(Default)]
pub struct SetupBindings {
    entries: IndexMap<String, Binding>,
}

impl SetupBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a reactive state field, hydrated from any snapshot slice.
    pub fn state(mut self, key: &str, cell: Cell) -> Self {
        self.entries
            .insert(key.to_owned(), Binding::State { cell, hydrate: true });
        self
    }

    /// Export a reactive state field that snapshot hydration leaves alone.
    pub fn state_skip_hydrate(mut self, key: &str, cell: Cell) -> Self {
        self.entries
            .insert(key.to_owned(), Binding::State { cell, hydrate: false });
        self
    }

    /// Export a derived value.
    pub fn getter(mut self, key: &str, memo: Memo<Value>) -> Self {
        self.entries.insert(key.to_owned(), Binding::Getter(memo));
        self
    }

    /// Export an action from a plain function body.
    pub fn action(
        mut self,
        key: &str,
        body: impl Fn(&Arc<Store>, &[Value]) -> anyhow::Result<ActionValue> + Send + Sync + 'static,
    ) -> Self {
        self.entries
            .insert(key.to_owned(), Binding::Action(Action::named(key, body)));
        self
    }

    /// Export an opaque value.
    pub fn opaque(mut self, key: &str, value: OpaqueValue) -> Self {
        self.entries.insert(key.to_owned(), Binding::Opaque(value));
        self
    }

    /// Export an already-constructed binding under `key`.
    pub fn insert(mut self, key: &str, binding: Binding) -> Self {
        self.entries.insert(key.to_owned(), binding);
        self
    }

    pub(crate) fn into_entries(self) -> IndexMap<String, Binding> {
        self.entries
    }
}

/// What plugins see of the definition that produced a store.
#[derive(Clone, Debug)]
pub struct OptionsSnapshot {
    pub flavor: StoreFlavor,
    pub state_keys: Vec<String>,
    pub actions: Vec<String>,
    pub getters: Vec<String>,
}

pub(crate) type SetupFn = Arc<dyn Fn(&SetupContext) -> SetupBindings + Send + Sync>;

#[derive(Clone)]
pub(crate) enum DefinitionFlavor {
    Options(OptionsDef),
    Setup(SetupFn),
}

/// A reusable recipe for a store. Calling [`get`](StoreDefinition::get)
/// builds the instance on first use and returns the cached singleton
/// afterwards; instances are per registry, not per definition.
#[derive(Clone)]
pub struct StoreDefinition {
    id: String,
    pub(crate) flavor: DefinitionFlavor,
}

impl StoreDefinition {
    /// Define an options store.
    pub fn options(id: &str, def: OptionsDef) -> Self {
        Self {
            id: id.to_owned(),
            flavor: DefinitionFlavor::Options(def),
        }
    }

    /// Define a setup store.
    pub fn setup(id: &str, setup: impl Fn(&SetupContext) -> SetupBindings + Send + Sync + 'static) -> Self {
        Self {
            id: id.to_owned(),
            flavor: DefinitionFlavor::Setup(Arc::new(setup)),
        }
    }

    /// The definition's store id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolve the store against the ambient registry: the one provided to
    /// the current component's host app if any, otherwise the active
    /// registry for this thread.
    pub fn get(&self) -> Result<Arc<Store>, LarderError> {
        let injected = ComponentLifetime::current()
            .and_then(|component| component.app())
            .and_then(|app| app.inject::<Registry>(REGISTRY_KEY));
        let registry = match injected {
            Some(registry) => {
                registry.make_active();
                registry
            }
            None => Registry::active().ok_or(LarderError::NoActiveRegistry)?,
        };
        self.get_with(&registry)
    }

    /// Resolve the store against an explicit registry.
    pub fn get_with(&self, registry: &Arc<Registry>) -> Result<Arc<Store>, LarderError> {
        if let Some(store) = registry.store(&self.id) {
            return Ok(store);
        }
        self.build_as(&self.id, registry)
    }

    /// Rebuild the store from this (presumably edited) definition and
    /// reconcile the live instance in place, preserving observers and
    /// surviving state.
    pub fn hot_update(&self, registry: &Arc<Registry>) -> Result<(), LarderError> {
        crate::hot::hot_update(self, registry)
    }

    pub(crate) fn build_as(&self, id: &str, registry: &Arc<Registry>) -> Result<Arc<Store>, LarderError> {
        match &self.flavor {
            DefinitionFlavor::Options(def) => build::build_options_store(id, def, registry),
            DefinitionFlavor::Setup(setup) => build::build_setup_store(id, setup, registry),
        }
    }
}
