//! Shared HTTP plumbing for actions and data sources: header and query
//! encoding, auth injection, timeouts, error extraction and response shaping.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value, json};
use tessera_api::{HttpRequest, HttpResponse, HttpTransport, Method, ResponsePayload};
use tessera_types::{AuthSpec, DataSource, ResponseType};
use tessera_util::{format_json_value, join_url};
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// Header pairs from a JSON map; `null` values are dropped.
pub fn header_pairs(headers: &Map<String, Value>) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| (name.clone(), format_json_value(value)))
        .collect()
}

/// Query pairs from a JSON map; arrays repeat the key, `null` values are dropped.
pub fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in query {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (name.clone(), format_json_value(item))),
            ),
            other => pairs.push((name.clone(), format_json_value(other))),
        }
    }
    pairs
}

/// Sets or replaces a header, matching names case-insensitively.
pub fn set_header(request: &mut HttpRequest, name: &str, value: String) {
    request.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    request.headers.push((name.to_string(), value));
}

/// Injects credentials for `auth`. Explicit headers of the same name are replaced.
pub fn apply_auth(request: &mut HttpRequest, auth: Option<&AuthSpec>) {
    match auth {
        Some(AuthSpec::Bearer { token }) if !token.is_empty() => set_header(request, "Authorization", format!("Bearer {token}")),
        Some(AuthSpec::Basic { username, password }) => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            set_header(request, "Authorization", format!("Basic {encoded}"));
        }
        Some(AuthSpec::ApiKey { header, key }) if !key.is_empty() => set_header(request, header, key.clone()),
        _ => {}
    }
}

pub fn parse_method(verb: &str) -> Result<Method, RuntimeError> {
    Method::from_bytes(verb.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| RuntimeError::validation(format!("invalid HTTP method '{verb}'")))
}

/// Whether requests with this verb carry a body.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

/// Builds the request a REST descriptor describes.
pub fn descriptor_request(source: &DataSource, verb: &str) -> Result<HttpRequest, RuntimeError> {
    let url = join_url(&source.base_url, &source.path);
    if url.is_empty() {
        return Err(RuntimeError::validation(format!("data source '{}' has no URL", source.id)));
    }
    let method = parse_method(verb)?;
    let mut request = HttpRequest::new(method, url);
    request.headers = header_pairs(&source.headers);
    if let Some(query) = source.query_params() {
        request.query = query_pairs(query);
    }
    if carries_body(&request.method)
        && let Some(body) = &source.body
    {
        request = request.json(body.clone());
    }
    apply_auth(&mut request, source.auth.as_ref());
    if source.includes_credentials() {
        debug!(data_source_id = %source.id, "credentials requested; cookie store is shared by the transport");
    }
    Ok(request)
}

/// GraphQL-over-HTTP request body.
pub fn graphql_payload(document: &str, variables: Option<&Value>, operation_name: Option<&str>) -> Value {
    let mut payload = json!({
        "query": document,
        "variables": variables.cloned().unwrap_or_else(|| json!({})),
    });
    if let Some(name) = operation_name {
        payload["operationName"] = Value::String(name.to_string());
    }
    payload
}

/// Extracts `data` from a GraphQL response, failing on a non-empty `errors` list.
pub fn graphql_data(response: Value) -> Result<Value, RuntimeError> {
    if let Some(errors) = response.get("errors").and_then(Value::as_array)
        && let Some(first) = errors.first()
    {
        let message = first
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| first.to_string());
        return Err(RuntimeError::Graphql(message));
    }
    Ok(response.get("data").cloned().unwrap_or(Value::Null))
}

/// Sends `request`, enforcing `timeout` and turning non-2xx statuses into [`RuntimeError::Http`].
pub async fn send(transport: &dyn HttpTransport, mut request: HttpRequest, timeout: Duration) -> Result<HttpResponse, RuntimeError> {
    request.timeout = Some(timeout);
    debug!(method = %request.method, url = %request.url, timeout_ms = timeout.as_millis() as u64, "dispatching request");
    let response = match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(outcome) => outcome?,
        Err(_) => return Err(RuntimeError::Timeout),
    };
    if response.is_success() {
        Ok(response)
    } else {
        Err(http_error(&response))
    }
}

/// Builds an HTTP error, preferring a message the server put in the body.
pub fn http_error(response: &HttpResponse) -> RuntimeError {
    let body = ResponsePayload::classify(response).into_value();
    let message = error_message(&body).unwrap_or_else(|| format!("request failed with status {}", response.status));
    warn!(status = response.status, %message, "request failed");
    RuntimeError::Http {
        status: response.status,
        message,
        body,
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().chars().take(200).collect()),
        Value::Object(map) => ["message", "error", "detail", "title"].iter().find_map(|key| match map.get(*key) {
            Some(Value::String(text)) => Some(text.clone()),
            Some(nested @ Value::Object(_)) => error_message(nested),
            _ => None,
        }),
        _ => None,
    }
}

/// Decoded payload as a JSON value.
pub fn response_data(response: &HttpResponse) -> Value {
    ResponsePayload::classify(response).into_value()
}

/// Shapes a successful response for storage; `None` means nothing is written.
pub fn shape_response(response: &HttpResponse, response_type: ResponseType) -> Option<Value> {
    match response_type {
        ResponseType::Data => Some(response_data(response)),
        ResponseType::Full => Some(json!({
            "status": response.status,
            "headers": response.headers_json(),
            "data": response_data(response),
        })),
        ResponseType::None => None,
    }
}
