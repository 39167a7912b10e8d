//! URL assembly helpers.

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};
use url::Url;

/// Joins a base URL and a relative path with exactly one `/` between them.
///
/// An absolute `path` (with a scheme) wins over the base.
pub fn join_url(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.contains("://") {
        return path.to_string();
    }
    let base = base_url.trim();
    match (base.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/')),
    }
}

/// Replaces `{name}` placeholders in a path template with percent-encoded values.
pub fn build_path(template: &str, variables: &Map<String, Value>) -> String {
    let mut path = template.to_string();
    for (key, value) in variables {
        let raw = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let encoded = utf8_percent_encode(&raw, NON_ALPHANUMERIC).to_string();
        path = path.replace(&format!("{{{}}}", key), &encoded);
    }
    path
}

/// Rewrites an `http(s)` URL to its `ws(s)` counterpart; socket URLs pass through.
pub fn to_socket_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw).ok()?;
    let scheme = match parsed.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Some(parsed.to_string()),
        _ => return None,
    };
    parsed.set_scheme(scheme).ok()?;
    Some(parsed.to_string())
}
