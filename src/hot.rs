//! Hot swap: rebuild a store from an edited definition and reconcile the
//! live instance in place.
//!
//! Observers keep their handles and the live store keeps its identity;
//! only the slot map underneath changes. State values survive where the
//! new definition still declares the field, actions and getters are
//! replaced wholesale, and fields the new definition dropped disappear.

use crate::error::LarderError;
use crate::registry::Registry;
use crate::store::build::options_getter_memo;
use crate::store::{merge_values, Slot, Store, StoreDefinition, StoreFlavor};
use std::sync::Arc;
use tracing::debug;

pub(crate) fn hot_update(
    definition: &StoreDefinition,
    registry: &Arc<Registry>,
) -> Result<(), LarderError> {
    let id = definition.id();
    let Some(live) = registry.store(id) else {
        // nothing to reconcile; a plain build picks up the new definition
        definition.get_with(registry)?;
        return Ok(());
    };

    // Build the replacement under a synthetic id so the shared state tree
    // and the store map never see two entries for the real one.
    let staging_id = format!("<hot>:{id}");
    let fresh = definition.build_as(&staging_id, registry)?;
    transplant(registry, &live, &fresh);

    // Drop the staging entries without stopping the fresh scope: the live
    // store adopted memos created under it.
    registry.remove_store(&staging_id);
    registry.remove_slice(&staging_id);
    debug!(store = id, "hot swap applied");
    Ok(())
}

fn transplant(registry: &Arc<Registry>, live: &Arc<Store>, fresh: &Arc<Store>) {
    live.begin_hot_swap();
    let fresh_slots = fresh.slots_snapshot();

    // State: new cells win identity, old values win content. An object/
    // object pair merges so fields added by the edit keep their fresh
    // defaults; anything else keeps the old value outright.
    let old_state = live.state_keys();
    let mut new_state = Vec::new();
    for (key, slot) in &fresh_slots {
        if let Slot::State(new_cell) = slot {
            new_state.push(key.clone());
            if let Some(Slot::State(old_cell)) = live.slot(key) {
                let old_value = old_cell.peek();
                if old_value.is_object() && new_cell.peek().is_object() {
                    new_cell.update(|value| merge_values(value, &old_value));
                } else {
                    new_cell.set(old_value);
                }
            }
            // rebinds the sink from the staging store to the live one
            live.install_state_cell(key, new_cell);
        }
    }
    for key in old_state {
        if !new_state.contains(&key) {
            live.remove_state_slot(&key);
        }
    }

    // Actions replace wholesale.
    let old_actions = live.action_names();
    let mut new_actions = Vec::new();
    for (key, slot) in &fresh_slots {
        if let Slot::Action(action) = slot {
            new_actions.push(key.clone());
            live.insert_slot(key, Slot::Action(action.clone()));
        }
    }
    for key in old_actions {
        if !new_actions.contains(&key) {
            live.remove_slot(&key);
        }
    }

    // Getters: staging memos resolve the staging id, so options stores
    // rebuild them against the live id from the raw getter functions.
    // Setup-store memos close over their cells directly and adopt as-is.
    let old_getters = live.getter_names();
    let mut new_getters = Vec::new();
    if live.flavor() == StoreFlavor::Options {
        let raw = fresh.raw_getters();
        live.set_raw_getters(raw.clone());
        for (name, getter) in raw {
            new_getters.push(name.clone());
            let memo = live
                .scope()
                .run(|| options_getter_memo(registry, live.id(), getter));
            live.insert_slot(&name, Slot::Getter(memo));
        }
    } else {
        for (key, slot) in &fresh_slots {
            if let Slot::Getter(memo) = slot {
                new_getters.push(key.clone());
                live.insert_slot(key, Slot::Getter(memo.clone()));
            }
        }
    }
    for key in old_getters {
        if !new_getters.contains(&key) {
            live.remove_slot(&key);
        }
    }

    live.end_hot_swap();
}
