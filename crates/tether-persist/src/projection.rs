//! Persisted-field projection

use serde_json::Value;

use tether_core::State;

/// Restrict a state to the persisted fields it actually contains
pub fn project(state: &State, fields: &[String]) -> State {
    fields
        .iter()
        .filter_map(|field| state.get(field).map(|v| (field.clone(), v.clone())))
        .collect()
}

/// Merge a restored snapshot into a state
///
/// Only persisted fields are taken from the snapshot; every other field of
/// `state` is left untouched. A snapshot that is not an object merges
/// nothing.
pub fn merge_restored(state: &State, snapshot: &Value, fields: &[String]) -> State {
    let mut merged = state.clone();
    if let Some(saved) = snapshot.as_object() {
        for field in fields {
            if let Some(value) = saved.get(field) {
                merged.insert(field.clone(), value.clone());
            }
        }
    }
    merged
}
