//! Deep merge of JSON documents.

use serde_json::Value;

/// Merges `overlay` into `base`.
///
/// Objects merge key by key (recursively); any other overlay value, including
/// arrays, replaces the base value. `null` in the overlay is ignored so partial
/// override documents can leave fields untouched.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (base_value, overlay_value) => *base_value = overlay_value.clone(),
    }
}
