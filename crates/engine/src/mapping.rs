//! Result post-processing: path extraction, sandboxed transforms and output keys.

use serde_json::{Value, json};
use tessera_types::{DataMapping, ResultMapping};
use tessera_util::select_path;
use tracing::warn;

use crate::{error::RuntimeError, expr::Expression, state::StateStore};

/// Evaluates `transform` with the value bound to `data` and nothing else in scope.
///
/// A leading `return` and trailing `;` are tolerated so function-body style
/// transforms keep working.
pub fn run_transform(transform: &str, data: &Value) -> Result<Value, RuntimeError> {
    let source = transform.trim().trim_end_matches(';').trim();
    let source = source.strip_prefix("return ").unwrap_or(source);
    let expression = Expression::parse(source).map_err(|error| RuntimeError::Mapping(error.to_string()))?;
    let context = json!({ "data": data });
    expression
        .evaluate(&context)
        .map(|value| value.unwrap_or(Value::Null))
        .map_err(|error| RuntimeError::Mapping(error.to_string()))
}

/// Applies an action's result mapping: path extraction, then the transform.
pub fn apply_result_mapping(raw: &Value, mapping: Option<&ResultMapping>) -> Result<Value, RuntimeError> {
    let Some(mapping) = mapping else {
        return Ok(raw.clone());
    };
    let extracted = select_path(raw, mapping.path.as_deref()).unwrap_or(Value::Null);
    match mapping.transform.as_deref() {
        Some(transform) => run_transform(transform, &extracted),
        None => Ok(extracted),
    }
}

/// Result mapping for streamed frames, where a failure is stored instead of
/// ending the stream.
pub fn map_frame(raw: &Value, mapping: Option<&ResultMapping>) -> Value {
    apply_result_mapping(raw, mapping).unwrap_or_else(|error| {
        warn!(%error, "result mapping failed");
        error.to_structured()
    })
}

/// Runs every mapping for a data source in order, chaining transformed values and
/// writing output keys into state.
pub fn apply_data_mappings<'a>(
    data_source_id: &str,
    raw: Value,
    mappings: impl Iterator<Item = &'a DataMapping>,
    state: &dyn StateStore,
) -> Value {
    let mut value = raw;
    for mapping in mappings {
        if let Some(transform) = mapping.transform.as_deref() {
            value = match run_transform(transform, &value) {
                Ok(mapped) => mapped,
                Err(error) => {
                    warn!(data_source_id, %error, "data mapping failed");
                    error.to_structured()
                }
            };
        }
        if let Some(output_key) = mapping.output_key.as_deref() {
            state.set(output_key, value.clone());
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn transform_sees_only_data() {
        assert_eq!(run_transform("data.items.length", &json!({ "items": [1, 2] })).unwrap(), json!(2));
        assert_eq!(run_transform("return data * 2;", &json!(21)).unwrap(), json!(42));
        assert!(matches!(run_transform("state.secret", &json!({})), Err(RuntimeError::Mapping(_))));
    }

    #[test]
    fn result_mapping_extracts_then_transforms() {
        let mapping = ResultMapping {
            path: Some("payload.rows".into()),
            transform: Some("data[0]".into()),
        };
        let raw = json!({ "payload": { "rows": [{ "id": 9 }] } });
        assert_eq!(apply_result_mapping(&raw, Some(&mapping)).unwrap(), json!({ "id": 9 }));
        assert_eq!(apply_result_mapping(&raw, None).unwrap(), raw);
    }

    #[test]
    fn failing_transform_is_an_error_except_for_frames() {
        let mapping = ResultMapping {
            path: None,
            transform: Some("data +".into()),
        };
        assert!(matches!(apply_result_mapping(&json!(1), Some(&mapping)), Err(RuntimeError::Mapping(_))));
        let mapped = map_frame(&json!(1), Some(&mapping));
        assert_eq!(mapped["ok"], json!(false));
        assert!(mapped["error"].as_str().unwrap().starts_with("Mapping error"));
    }

    #[test]
    fn data_mappings_chain_and_write_output_keys() {
        let state = MemoryStateStore::default();
        let mappings = vec![
            DataMapping {
                source_ids: vec!["orders".into()],
                transform: Some("data.items".into()),
                output_key: None,
            },
            DataMapping {
                source_ids: vec!["orders".into()],
                transform: Some("data.length".into()),
                output_key: Some("stats.orderCount".into()),
            },
        ];
        let raw = json!({ "items": [{}, {}, {}] });
        let first = apply_data_mappings("orders", raw.clone(), mappings.iter(), &state);
        let second = apply_data_mappings("orders", raw, mappings.iter(), &state);
        assert_eq!(first, json!(3));
        assert_eq!(first, second);
        assert_eq!(state.get("stats.orderCount"), Some(json!(3)));
    }
}
