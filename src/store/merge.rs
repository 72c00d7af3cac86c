//! Deep-merge semantics shared by patching, hydration, and hot swaps.

use serde_json::Value;

/// Merge `patch` into `target`.
///
/// When both sides are objects the merge recurses per key; any other
/// pairing replaces the target wholesale. Arrays are values, not
/// collections to splice: a patched array replaces the old one.
pub(crate) fn merge_values(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, sub) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && sub.is_object() => {
                        merge_values(existing, sub);
                    }
                    _ => {
                        target_map.insert(key.clone(), sub.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
