//! Inspector formatting payloads.
//!
//! Pure data producers for debugging front-ends: tree nodes, bucketed
//! state listings, and change-event diffs. No wire protocol lives here;
//! everything serializes with `serde`.

use crate::registry::Registry;
use crate::store::{ChangeEvent, MutationKind, Slot, Store};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Synthetic inspector id for the registry itself.
pub const ROOT_ID: &str = "_root";
pub const ROOT_LABEL: &str = "Larder (root)";

/// One node of the inspector tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InspectorNode {
    pub id: String,
    pub label: String,
}

/// One row of a state bucket.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
    pub editable: bool,
}

/// Bucketed state listing for one inspector node. Empty buckets are
/// omitted from the serialized form.
#[derive(Clone, Debug, Default, Serialize)]
pub struct InspectorState {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub state: Vec<StateEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub getters: Vec<StateEntry>,
    #[serde(rename = "customProperties", skip_serializing_if = "Vec::is_empty")]
    pub custom_properties: Vec<StateEntry>,
}

/// The inspector tree: the root node first, then one node per built
/// store in id order.
pub fn tree(registry: &Arc<Registry>) -> Vec<InspectorNode> {
    let mut nodes = vec![InspectorNode {
        id: ROOT_ID.to_owned(),
        label: ROOT_LABEL.to_owned(),
    }];
    for id in registry.store_ids() {
        nodes.push(InspectorNode {
            label: id.clone(),
            id,
        });
    }
    nodes
}

/// Root-node state: one editable entry per store, valued at its slice.
pub fn registry_state(registry: &Arc<Registry>) -> InspectorState {
    let mut state = Vec::new();
    for id in registry.store_ids() {
        let value = registry.slice_value(&id).unwrap_or(Value::Null);
        state.push(StateEntry {
            key: id,
            value,
            editable: true,
        });
    }
    InspectorState {
        state,
        ..InspectorState::default()
    }
}

/// Store-node state: state fields (editable), getters, and
/// plugin-contributed custom properties.
pub fn store_state(store: &Arc<Store>) -> InspectorState {
    let mut out = InspectorState::default();
    for key in store.state_keys() {
        out.state.push(StateEntry {
            value: store.get(&key).unwrap_or(Value::Null),
            key,
            editable: true,
        });
    }
    for key in store.getter_names() {
        out.getters.push(StateEntry {
            value: store.get(&key).unwrap_or(Value::Null),
            key,
            editable: false,
        });
    }
    for key in store.custom_property_names() {
        let value = match store.slot(&key) {
            Some(Slot::State(cell)) => cell.peek(),
            Some(Slot::Getter(memo)) => memo.get(),
            Some(Slot::Action(_)) => Value::String("<action>".to_owned()),
            Some(Slot::Opaque(_)) => Value::String("<opaque>".to_owned()),
            None => Value::Null,
        };
        out.custom_properties.push(StateEntry {
            key,
            value,
            editable: false,
        });
    }
    out
}

/// Normalized diff over a batch of field-change events.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDiff {
    pub keys: Vec<String>,
    pub operations: Vec<String>,
    pub old_value: Value,
    pub new_value: Value,
}

/// Collapse a mutation's events into one keyed diff.
pub fn event_diff(events: &[ChangeEvent]) -> EventDiff {
    let mut old_value = Map::new();
    let mut new_value = Map::new();
    let mut keys = Vec::with_capacity(events.len());
    for event in events {
        keys.push(event.key.clone());
        old_value.insert(event.key.clone(), event.old.clone());
        new_value.insert(event.key.clone(), event.new.clone());
    }
    EventDiff {
        operations: vec!["set".to_owned(); events.len()],
        keys,
        old_value: Value::Object(old_value),
        new_value: Value::Object(new_value),
    }
}

/// Single-event display form.
pub fn event_display(event: &ChangeEvent) -> Value {
    serde_json::json!({
        "key": event.key,
        "oldValue": event.old,
        "newValue": event.new,
    })
}

/// Human label for a mutation kind.
pub fn mutation_label(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Direct => "direct",
        MutationKind::PatchObject => "patch object",
        MutationKind::PatchFunction => "patch function",
    }
}
