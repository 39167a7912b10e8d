//! Unified HTTP executor for the CRUD, `api_call`, `audit_log` and
//! `ai_generate` actions.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde_json::{Map, Value};
use tessera_api::{FormPart, HttpRequest, RequestBody};
use tessera_types::{ActionKind, AuthSpec, DataSource, EventHandler, RetrySpec};
use tessera_util::{build_path, format_json_value, join_url};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DispatchResult;
use crate::{
    context::RuntimeContext,
    error::RuntimeError,
    request::{self, apply_auth, carries_body, header_pairs, parse_method, query_pairs},
    retry::RetryCoordinator,
};

/// Where a request goes and what it carries before the action adds its own parts.
pub(super) struct Target {
    pub url: String,
    pub headers: Map<String, Value>,
    pub query: Map<String, Value>,
    pub auth: Option<AuthSpec>,
    pub descriptor: Option<DataSource>,
}

impl Target {
    /// Resolves the descriptor (if any) and layers the handler's URL, headers and query on top.
    pub fn resolve(ctx: &RuntimeContext, handler: &EventHandler, data: Option<&Value>) -> Result<Self, RuntimeError> {
        let descriptor = handler
            .data_source_id
            .as_deref()
            .map(|id| ctx.resolve_descriptor(id, data))
            .transpose()?;

        let (mut headers, auth, mut query, base_url) = match &descriptor {
            Some(source) => (
                source.headers.clone(),
                source.auth.clone(),
                source.query_params().cloned().unwrap_or_default(),
                Some(join_url(&source.base_url, &source.path)),
            ),
            None => {
                let global = ctx.schema().global.clone();
                let headers = match ctx.deep_resolve(&Value::Object(global.default_headers), data) {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                let auth = global
                    .auth
                    .and_then(|auth| serde_json::to_value(auth).ok())
                    .and_then(|raw| serde_json::from_value(ctx.deep_resolve(&raw, data)).ok());
                (headers, auth, Map::new(), None)
            }
        };

        let explicit_url = handler.url.clone().or_else(|| handler.param_str("url").map(str::to_string));
        let mut url = match (explicit_url, base_url) {
            (Some(url), _) => url,
            (None, Some(base)) => match handler.param_str("path") {
                Some(path) => join_url(&base, path),
                None => base,
            },
            (None, None) => {
                return Err(RuntimeError::validation(format!(
                    "{} needs a url or a dataSourceId",
                    handler.action
                )));
            }
        };
        url = build_path(&url, &handler.params);

        if let Some(extra) = &handler.headers {
            headers.extend(extra.clone());
        }
        if let Some(extra) = &handler.query {
            query.extend(extra.clone());
        }
        if let Some(Value::Object(extra)) = handler.params.get("query") {
            query.extend(extra.clone());
        }

        Ok(Self {
            url,
            headers,
            query,
            auth,
            descriptor,
        })
    }

    pub fn request(&self, method: tessera_api::Method) -> HttpRequest {
        let mut request = HttpRequest::new(method, self.url.clone());
        request.headers = header_pairs(&self.headers);
        request.query = query_pairs(&self.query);
        apply_auth(&mut request, self.auth.as_ref());
        request
    }

    pub fn timeout(&self, ctx: &RuntimeContext, handler: &EventHandler) -> Duration {
        handler
            .timeout_ms
            .or_else(|| self.descriptor.as_ref().and_then(|source| source.timeout_ms))
            .map(Duration::from_millis)
            .unwrap_or_else(|| ctx.request_timeout())
    }

    pub fn retry(&self, handler: &EventHandler) -> RetrySpec {
        handler
            .retry
            .clone()
            .or_else(|| self.descriptor.as_ref().and_then(|source| source.retry.clone()))
            .unwrap_or_else(RetrySpec::once)
    }
}

/// Verb: explicit override, then the action kind, then the descriptor, then GET.
fn verb(handler: &EventHandler, descriptor: Option<&DataSource>) -> String {
    handler
        .method
        .clone()
        .or_else(|| handler.param_str("method").map(str::to_string))
        .or_else(|| handler.action.implied_http_verb().map(str::to_string))
        .or_else(|| descriptor.and_then(|source| source.method.http_verb()).map(str::to_string))
        .unwrap_or_else(|| "GET".to_string())
}

fn body(handler: &EventHandler, data: Option<&Value>, descriptor: Option<&DataSource>) -> Result<RequestBody, RuntimeError> {
    if let Some(Value::Object(fields)) = handler.params.get("formData") {
        return multipart(fields).map(RequestBody::Multipart);
    }
    if let Some(body) = handler.body.clone().or_else(|| handler.params.get("body").cloned()) {
        return Ok(RequestBody::Json(body));
    }
    if let Some(data) = data {
        return Ok(RequestBody::Json(data.clone()));
    }
    match handler.action {
        ActionKind::AuditLog => {
            let mut entry = handler.params.clone();
            entry
                .entry("timestamp")
                .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
            return Ok(RequestBody::Json(Value::Object(entry)));
        }
        ActionKind::AiGenerate => return Ok(RequestBody::Json(Value::Object(handler.params.clone()))),
        _ => {}
    }
    Ok(descriptor
        .and_then(|source| source.body.clone())
        .map(RequestBody::Json)
        .unwrap_or_default())
}

/// Text fields become text parts; `{filename, contentType, base64}` objects become files.
fn multipart(fields: &Map<String, Value>) -> Result<Vec<FormPart>, RuntimeError> {
    let mut parts = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        let part = match value {
            Value::Object(file) if file.contains_key("base64") => {
                let encoded = file.get("base64").and_then(Value::as_str).unwrap_or_default();
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|error| RuntimeError::validation(format!("form field '{name}' is not valid base64: {error}")))?;
                FormPart::File {
                    name: name.clone(),
                    filename: file
                        .get("filename")
                        .and_then(Value::as_str)
                        .unwrap_or(name.as_str())
                        .to_string(),
                    content_type: file.get("contentType").and_then(Value::as_str).map(str::to_string),
                    bytes: Bytes::from(bytes),
                }
            }
            Value::Null => continue,
            other => FormPart::Text {
                name: name.clone(),
                value: format_json_value(other),
            },
        };
        parts.push(part);
    }
    Ok(parts)
}

pub(super) async fn execute(
    ctx: &RuntimeContext,
    handler: &EventHandler,
    data: Option<&Value>,
    token: &CancellationToken,
) -> DispatchResult {
    let target = Target::resolve(ctx, handler, data)?;
    let method = parse_method(&verb(handler, target.descriptor.as_ref()))?;
    let mut request = target.request(method);
    if carries_body(&request.method) {
        request.body = body(handler, data, target.descriptor.as_ref())?;
    }

    let timeout = target.timeout(ctx, handler);
    let retry = target.retry(handler);
    debug!(action = %handler.action, method = %request.method, url = %request.url, attempts = retry.attempts, "http action");

    let transport = ctx.transport();
    let response = RetryCoordinator::run(|| request::send(transport, request.clone(), timeout), &retry, token).await?;
    if let Some(error_key) = target.descriptor.as_ref().and_then(|source| source.error_key.as_deref()) {
        ctx.state().set(error_key, Value::Null);
    }
    Ok(request::shape_response(&response, handler.response_type.unwrap_or_default()))
}
