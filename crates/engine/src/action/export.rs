//! `export_file`: serializes resolved data to JSON or CSV and hands the bytes
//! to the host.

use bytes::Bytes;
use serde_json::Value;
use tessera_types::EventHandler;
use tessera_util::format_json_value;

use super::{DispatchResult, capability_error};
use crate::{context::RuntimeContext, error::RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    fn parse(raw: Option<&str>) -> Result<Self, RuntimeError> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("json") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            Some(other) => Err(RuntimeError::validation(format!("unsupported export format '{other}'"))),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

pub(super) async fn execute(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let format = ExportFormat::parse(handler.param_str("format"))?;
    let data = handler.params.get("data").cloned().unwrap_or(Value::Null);
    let filename = handler
        .param_str("filename")
        .map(str::to_string)
        .unwrap_or_else(|| format!("export.{}", format.extension()));

    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(&data).map_err(|error| RuntimeError::validation(error.to_string()))?,
        ExportFormat::Csv => to_csv(&data)?.into_bytes(),
    };
    let size = bytes.len();
    ctx.runtime()
        .export_file(&filename, format.content_type(), Bytes::from(bytes))
        .await
        .map_err(|error| capability_error(handler.action, error))?;
    Ok(Some(serde_json::json!({ "filename": filename, "size": size })))
}

/// Rows are objects; the header comes from the first row's keys.
fn to_csv(data: &Value) -> Result<String, RuntimeError> {
    let rows = data
        .as_array()
        .ok_or_else(|| RuntimeError::validation("csv export needs an array of rows"))?;
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let columns: Vec<&String> = first
        .as_object()
        .ok_or_else(|| RuntimeError::validation("csv rows must be objects"))?
        .keys()
        .collect();

    let mut out = String::new();
    out.push_str(&columns.iter().map(|column| escape(column)).collect::<Vec<_>>().join(","));
    out.push('\n');
    for row in rows {
        let line = columns
            .iter()
            .map(|column| escape(&row.get(column.as_str()).map(format_json_value).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_uses_first_row_header_and_quotes() {
        let data = json!([
            { "id": 1, "name": "Ada, Countess" },
            { "id": 2, "name": "Grace \"Amazing\"" },
            { "id": 3 }
        ]);
        let csv = to_csv(&data).unwrap();
        assert_eq!(csv, "id,name\n1,\"Ada, Countess\"\n2,\"Grace \"\"Amazing\"\"\"\n3,\n");
    }

    #[test]
    fn csv_requires_rows() {
        assert!(to_csv(&json!({ "id": 1 })).is_err());
        assert_eq!(to_csv(&json!([])).unwrap(), "");
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ExportFormat::parse(None).unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::parse(Some("CSV")).unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::parse(Some("xlsx")).is_err());
    }
}
