//! Dotted-path access into `serde_json::Value` trees.
//!
//! Paths use `.` separators with optional numeric segments (`items.0.id`) or
//! bracket indices (`items[0].id`). Writes create intermediate objects as
//! needed and extend arrays with `null` when an index lands past the end.

use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits a dotted/bracketed path into segments.
pub fn parse_segments(path: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    for part in path.trim().split('.') {
        if part.is_empty() {
            continue;
        }
        let (key, indices) = split_indices(part);
        if !key.is_empty() {
            match key.parse::<usize>() {
                Ok(index) if indices.is_empty() => segments.push(Segment::Index(index)),
                _ => segments.push(Segment::Key(key)),
            }
        }
        segments.extend(indices.into_iter().map(Segment::Index));
    }
    segments
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let bytes = segment.as_bytes();
    let key_end = bytes.iter().position(|b| *b == b'[').unwrap_or(segment.len());
    let key = &segment[..key_end];
    let mut indices = Vec::new();
    let mut i = key_end;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            break;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i <= start {
            break;
        }
        if let Ok(n) = segment[start..i].trim().parse::<usize>() {
            indices.push(n);
        }
        i += 1;
    }
    (key, indices)
}

/// Borrows the value at `path`, or `None` when any segment is missing.
///
/// An empty path returns the root.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in parse_segments(path) {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(index)?,
            (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// Clones the value selected by `path`; `None` or a blank path yields the whole value.
pub fn select_path(value: &Value, path: Option<&str>) -> Option<Value> {
    match path {
        None => Some(value.clone()),
        Some(path) if path.trim().is_empty() => Some(value.clone()),
        Some(path) => get_path(value, path).cloned(),
    }
}

/// Writes `new_value` at `path`, creating intermediate containers.
///
/// Returns the previous value at that location, if any.
pub fn set_path(root: &mut Value, path: &str, new_value: Value) -> Option<Value> {
    let segments = parse_segments(path);
    let Some((last, parents)) = segments.split_last() else {
        return Some(std::mem::replace(root, new_value));
    };

    let mut current = root;
    for (position, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(segments.get(position + 1), Some(Segment::Index(_)));
        current = descend_or_create(current, segment, next_is_index);
    }

    match last {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current.as_object_mut().and_then(|map| map.insert((*key).to_string(), new_value))
        }
        Segment::Index(index) => {
            if let Value::Object(map) = current {
                return map.insert(index.to_string(), new_value);
            }
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let items = current.as_array_mut()?;
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
                items[*index] = new_value;
                None
            } else {
                Some(std::mem::replace(&mut items[*index], new_value))
            }
        }
    }
}

fn descend_or_create<'a>(current: &'a mut Value, segment: &Segment<'_>, next_is_index: bool) -> &'a mut Value {
    let empty_container = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(Map::new())
        }
    };
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let map = current.as_object_mut().expect("object ensured above");
            let slot = map.entry((*key).to_string()).or_insert_with(empty_container);
            if slot.is_null() {
                *slot = empty_container();
            }
            slot
        }
        Segment::Index(index) => {
            if current.is_object() {
                let map = current.as_object_mut().expect("object checked above");
                return map.entry(index.to_string()).or_insert_with(empty_container);
            }
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let items = current.as_array_mut().expect("array ensured above");
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
            }
            if items[*index].is_null() {
                items[*index] = empty_container();
            }
            &mut items[*index]
        }
    }
}

/// Removes the value at `path`, returning it.
pub fn remove_path(root: &mut Value, path: &str) -> Option<Value> {
    let segments = parse_segments(path);
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get_mut(*key)?,
            (Segment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    match (last, current) {
        (Segment::Key(key), Value::Object(map)) => map.remove(*key),
        (Segment::Index(index), Value::Object(map)) => map.remove(&index.to_string()),
        (Segment::Index(index), Value::Array(items)) if *index < items.len() => Some(items.remove(*index)),
        _ => None,
    }
}

/// Formats a JSON value for string interpolation.
///
/// Strings are returned as-is, null becomes an empty string and containers
/// are serialized compactly.
pub fn format_json_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn reads_dotted_and_bracketed_paths() {
        let value = json!({ "items": [{ "id": 1 }, { "id": 2 }], "user": { "name": "Ada" } });
        assert_eq!(get_path(&value, "items.1.id"), Some(&json!(2)));
        assert_eq!(get_path(&value, "items[0].id"), Some(&json!(1)));
        assert_eq!(get_path(&value, "user.name"), Some(&json!("Ada")));
        assert_eq!(get_path(&value, "user.email"), None);
        assert_eq!(get_path(&value, "user.name.first"), None);
        assert_eq!(get_path(&value, ""), Some(&value));
    }

    #[test]
    fn select_path_without_path_clones_root() {
        let value = json!({ "a": 1 });
        assert_eq!(select_path(&value, None), Some(value.clone()));
        assert_eq!(select_path(&value, Some("a")), Some(json!(1)));
        assert_eq!(select_path(&value, Some("b")), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut root = json!({});
        assert_eq!(set_path(&mut root, "ui.modal.open", json!(true)), None);
        assert_eq!(root, json!({ "ui": { "modal": { "open": true } } }));

        let previous = set_path(&mut root, "ui.modal.open", json!(false));
        assert_eq!(previous, Some(json!(true)));
    }

    #[test]
    fn set_path_extends_arrays() {
        let mut root = json!({ "rows": [] });
        set_path(&mut root, "rows[2].name", json!("c"));
        assert_eq!(root, json!({ "rows": [null, null, { "name": "c" }] }));
    }

    #[test]
    fn remove_path_returns_removed_value() {
        let mut root = json!({ "a": { "b": 1, "c": 2 } });
        assert_eq!(remove_path(&mut root, "a.b"), Some(json!(1)));
        assert_eq!(root, json!({ "a": { "c": 2 } }));
        assert_eq!(remove_path(&mut root, "a.zzz"), None);
    }

    #[test]
    fn formats_scalars_for_interpolation() {
        assert_eq!(format_json_value(&json!("hello")), "hello");
        assert_eq!(format_json_value(&json!(42)), "42");
        assert_eq!(format_json_value(&json!(true)), "true");
        assert_eq!(format_json_value(&json!(null)), "");
        assert_eq!(format_json_value(&json!({"key": "value"})), r#"{"key":"value"}"#);
    }
}
