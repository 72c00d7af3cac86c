//! Store construction: lowering a definition's bindings into a live
//! instance, hydrating from snapshot state, and running the plugin
//! pipeline.

use crate::error::LarderError;
use crate::reactive::Memo;
use crate::registry::{PluginContext, Registry, StateSlice};
use crate::store::definition::{
    Binding, GetterFn, HydrateHook, OptionsDef, OptionsSnapshot, SetupBindings, SetupContext,
    SetupFn, StateFactory, StoreFlavor,
};
use crate::store::instance::{Slot, Store};
use crate::store::merge::merge_values;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) fn build_options_store(
    id: &str,
    def: &OptionsDef,
    registry: &Arc<Registry>,
) -> Result<Arc<Store>, LarderError> {
    if registry.is_disposed() {
        return Err(LarderError::RegistryDisposed);
    }
    // Snapshot state captured before installation is what the custom
    // hydrate hook sees; the default hydration for options stores is the
    // slice re-use below.
    let initial_state = registry.slice_value(id);
    if initial_state.is_none() {
        let state = (def.state)();
        let mut slice = StateSlice::new();
        if let Some(obj) = state.as_object() {
            for (key, value) in obj {
                slice.insert(key.clone(), crate::reactive::Cell::new(value.clone()));
            }
        }
        registry.install_slice(id, slice);
    }

    let def = def.clone();
    let raw_getters = def.getters.clone();
    let state_factory = Arc::clone(&def.state);
    let hydrate_hook = def.hydrate.clone();
    let registry_for_bindings = Arc::clone(registry);
    let id_owned = id.to_owned();
    let store = build_store(
        id,
        StoreFlavor::Options,
        registry,
        initial_state,
        Some(state_factory),
        hydrate_hook,
        move |_ctx| {
            let mut bindings = SetupBindings::new();
            if let Some(slice) = registry_for_bindings.slice(&id_owned) {
                for (key, cell) in &slice {
                    bindings = bindings.state(key, cell.clone());
                }
            }
            for (name, action) in &def.actions {
                bindings = bindings.insert(name, Binding::Action(action.clone()));
            }
            for (name, getter) in &def.getters {
                let memo = options_getter_memo(&registry_for_bindings, &id_owned, Arc::clone(getter));
                bindings = bindings.getter(name, memo);
            }
            bindings
        },
    )?;
    store.set_raw_getters(raw_getters);
    Ok(store)
}

pub(crate) fn build_setup_store(
    id: &str,
    setup: &SetupFn,
    registry: &Arc<Registry>,
) -> Result<Arc<Store>, LarderError> {
    let initial_state = registry.slice_value(id);
    let setup = Arc::clone(setup);
    build_store(
        id,
        StoreFlavor::Setup,
        registry,
        initial_state,
        None,
        None,
        move |ctx| setup(ctx),
    )
}

/// Memo backing a declared options getter. Resolves the live store by id
/// on every recompute, so a hot swap rebinding the slot map is picked up
/// without rebuilding the memo graph around it.
pub(crate) fn options_getter_memo(
    registry: &Arc<Registry>,
    id: &str,
    getter: GetterFn,
) -> Memo<Value> {
    let registry = Arc::downgrade(registry);
    let id = id.to_owned();
    Memo::new(move || {
        let Some(registry) = registry.upgrade() else {
            return Value::Null;
        };
        registry.make_active();
        let Some(store) = registry.store(&id) else {
            return Value::Null;
        };
        getter(&store)
    })
}

#[allow(clippy::too_many_arguments)]
fn build_store(
    id: &str,
    flavor: StoreFlavor,
    registry: &Arc<Registry>,
    initial_state: Option<Value>,
    reset_factory: Option<StateFactory>,
    hydrate_hook: Option<HydrateHook>,
    make_bindings: impl FnOnce(&SetupContext) -> SetupBindings,
) -> Result<Arc<Store>, LarderError> {
    if registry.is_disposed() {
        return Err(LarderError::RegistryDisposed);
    }

    let scope = registry.scope().child();
    let store = Store::new_partial(id, flavor, registry, scope.clone(), reset_factory);
    // registered before the bindings run, so mutually-referencing setup
    // functions resolve this store instead of recursing
    registry.insert_store(id, Arc::clone(&store));
    if flavor == StoreFlavor::Setup && !registry.has_slice(id) {
        registry.install_slice(id, StateSlice::new());
    }

    let ctx = SetupContext::new();
    let bindings = registry.with_active(|| scope.run(|| make_bindings(&ctx)));

    let mut snapshot = OptionsSnapshot {
        flavor,
        state_keys: Vec::new(),
        actions: Vec::new(),
        getters: Vec::new(),
    };
    for (key, binding) in bindings.into_entries() {
        match binding {
            Binding::State { cell, hydrate } => {
                if flavor == StoreFlavor::Setup {
                    if hydrate {
                        if let Some(value) = initial_state.as_ref().and_then(|init| init.get(&key))
                        {
                            // hydrate before the sink is installed; snapshot
                            // adoption is not a mutation
                            if cell.peek().is_object() && value.is_object() {
                                cell.update(|current| merge_values(current, value));
                            } else {
                                cell.set(value.clone());
                            }
                        }
                    }
                }
                snapshot.state_keys.push(key.clone());
                store.install_state_cell(&key, &cell);
            }
            Binding::Getter(memo) => {
                if store.has_state(&key) {
                    warn!(
                        store = id,
                        key, "getter shadows a state field of the same name"
                    );
                }
                snapshot.getters.push(key.clone());
                store.insert_slot(&key, Slot::Getter(memo));
            }
            Binding::Action(action) => {
                action.set_name(&key);
                snapshot.actions.push(key.clone());
                store.insert_slot(&key, Slot::Action(action));
            }
            Binding::Opaque(value) => {
                store.insert_slot(&key, Slot::Opaque(value));
            }
        }
    }

    // Plugins run in declaration order inside the store's scope. Their
    // contributions install like setup bindings but are recorded as
    // custom properties and never hydrated.
    for plugin in registry.plugins_snapshot() {
        let plugin_ctx = PluginContext {
            store: &store,
            registry,
            options: &snapshot,
        };
        let extensions = scope.run(|| plugin.extend(&plugin_ctx));
        for (key, binding) in extensions {
            store.add_custom_property(&key);
            match binding {
                Binding::State { cell, .. } => store.install_state_cell(&key, &cell),
                Binding::Getter(memo) => store.insert_slot(&key, Slot::Getter(memo)),
                Binding::Action(action) => {
                    action.set_name(&key);
                    store.insert_slot(&key, Slot::Action(action));
                }
                Binding::Opaque(value) => store.insert_slot(&key, Slot::Opaque(value)),
            }
        }
    }

    if flavor == StoreFlavor::Options {
        if let (Some(init), Some(hook)) = (initial_state.as_ref(), hydrate_hook.as_ref()) {
            hook(&store, init);
        }
    }

    store.start_listening();
    debug!(store = id, ?flavor, "store built");
    Ok(store)
}
