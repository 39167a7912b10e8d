//! Remote data source descriptors and result mappings.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::retry::RetrySpec;

/// Transport class of a data source.
///
/// Parsed case-insensitively so `get`, `GET` and `Get` are equivalent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    /// GraphQL query or mutation over HTTP POST.
    Graphql,
    /// Raw duplex socket.
    Websocket,
    /// GraphQL subscription over a duplex socket.
    Subscription,
}

impl SourceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Graphql => "GRAPHQL",
            Self::Websocket => "WEBSOCKET",
            Self::Subscription => "SUBSCRIPTION",
        }
    }

    /// Whether the descriptor is served over a duplex socket.
    pub fn is_socket(&self) -> bool {
        matches!(self, Self::Websocket | Self::Subscription)
    }

    /// HTTP verb used for request/response descriptors.
    pub fn http_verb(&self) -> Option<&'static str> {
        match self {
            Self::Get => Some("GET"),
            Self::Post | Self::Graphql => Some("POST"),
            Self::Put => Some("PUT"),
            Self::Patch => Some("PATCH"),
            Self::Delete => Some("DELETE"),
            Self::Websocket | Self::Subscription => None,
        }
    }
}

impl fmt::Display for SourceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceMethod {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "GRAPHQL" => Ok(Self::Graphql),
            "WEBSOCKET" | "WS" => Ok(Self::Websocket),
            "SUBSCRIPTION" => Ok(Self::Subscription),
            other => Err(format!("unsupported data source method '{other}'")),
        }
    }
}

impl TryFrom<String> for SourceMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceMethod> for String {
    fn from(method: SourceMethod) -> Self {
        method.as_str().to_string()
    }
}

/// Credentials injected into outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSpec {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// `Authorization: Basic base64(username:password)`
    Basic { username: String, password: String },
    /// `<header>: <key>`
    #[serde(alias = "apiKey", alias = "api-key")]
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key: String,
    },
    /// Explicitly disables the global auth fallback.
    None,
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Periodic frame sent while a socket is open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSpec {
    #[serde(alias = "interval")]
    pub interval_ms: u64,
    #[serde(default = "default_heartbeat_message")]
    pub message: Value,
}

fn default_heartbeat_message() -> Value {
    Value::String("ping".into())
}

/// Wire variant spoken over a duplex socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SocketProtocol {
    /// Unframed JSON or text messages.
    #[default]
    Raw,
    /// `connection_init` → `connection_ack` → `subscribe` → `next`/`complete`.
    GraphqlTransportWs,
    /// Legacy `connection_init` → `connection_ack` → `start` → `data`/`stop`.
    GraphqlWs,
}

impl SocketProtocol {
    /// Value for the `Sec-WebSocket-Protocol` header.
    pub fn subprotocol(&self) -> Option<&'static str> {
        match self {
            Self::Raw => None,
            Self::GraphqlTransportWs => Some("graphql-transport-ws"),
            Self::GraphqlWs => Some("graphql-ws"),
        }
    }

    pub fn is_graphql(&self) -> bool {
        !matches!(self, Self::Raw)
    }
}

/// Socket connection settings for socket-class descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketSpec {
    /// Socket URL; derived from `baseUrl` + `path` when absent.
    #[serde(default)]
    pub url: Option<String>,
    /// Path of an HTTP setup call that returns connection parameters.
    #[serde(default)]
    pub setup_path: Option<String>,
    #[serde(default)]
    pub protocol: SocketProtocol,
    /// Frame sent right after a raw socket opens.
    #[serde(default)]
    pub message: Option<Value>,
    /// `connection_init` payload for subscription sockets.
    #[serde(default)]
    pub connection_params: Option<Value>,
}

/// Declarative description of a remote resource and its refresh policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    /// Id of a global descriptor this one inherits from.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub method: SourceMethod,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Query parameters (object) for REST, or the document (string) for GraphQL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    /// Milliseconds between refreshes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    /// State path that receives a structured error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_key: Option<String>,
    /// `include`, `same-origin` or `omit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<SocketSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl DataSource {
    /// A GET descriptor against `base_url` + `path`.
    pub fn get(id: impl Into<String>, base_url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reference: None,
            method: SourceMethod::Get,
            base_url: base_url.into(),
            path: path.into(),
            headers: Map::new(),
            auth: None,
            body: None,
            query: None,
            variables: None,
            polling_interval: None,
            heartbeat: None,
            retry: None,
            error_key: None,
            credentials: None,
            socket: None,
            timeout_ms: None,
        }
    }

    /// Query parameters when `query` is an object.
    pub fn query_params(&self) -> Option<&Map<String, Value>> {
        self.query.as_ref().and_then(Value::as_object)
    }

    /// GraphQL document when `query` is a string.
    pub fn graphql_document(&self) -> Option<&str> {
        self.query.as_ref().and_then(Value::as_str)
    }

    /// Socket protocol, falling back to the method's natural protocol.
    pub fn socket_protocol(&self) -> SocketProtocol {
        match (&self.socket, self.method) {
            (Some(socket), _) if socket.protocol != SocketProtocol::Raw => socket.protocol,
            (_, SourceMethod::Subscription) => SocketProtocol::GraphqlTransportWs,
            _ => SocketProtocol::Raw,
        }
    }

    pub fn includes_credentials(&self) -> bool {
        self.credentials.as_deref() == Some("include")
    }
}

/// Post-processing attached to one or more data sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMapping {
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub transform: Option<String>,
    /// State path that additionally receives the mapped value.
    #[serde(default)]
    pub output_key: Option<String>,
}

impl DataMapping {
    pub fn applies_to(&self, data_source_id: &str) -> bool {
        self.source_ids.iter().any(|id| id == data_source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_parses_case_insensitively() {
        let ds: DataSource = serde_json::from_value(json!({ "id": "a", "method": "post" })).unwrap();
        assert_eq!(ds.method, SourceMethod::Post);
        let ds: DataSource = serde_json::from_value(json!({ "id": "b", "method": "Subscription" })).unwrap();
        assert!(ds.method.is_socket());
        assert!(serde_json::from_value::<DataSource>(json!({ "id": "c", "method": "FETCH" })).is_err());
    }

    #[test]
    fn auth_variants_parse_with_aliases() {
        let auth: AuthSpec = serde_json::from_value(json!({ "type": "apiKey", "key": "k1" })).unwrap();
        assert_eq!(
            auth,
            AuthSpec::ApiKey {
                header: "X-API-Key".into(),
                key: "k1".into()
            }
        );
        let auth: AuthSpec = serde_json::from_value(json!({ "type": "bearer", "token": "t" })).unwrap();
        assert_eq!(auth, AuthSpec::Bearer { token: "t".into() });
    }

    #[test]
    fn subscription_defaults_to_transport_ws_protocol() {
        let ds: DataSource = serde_json::from_value(json!({ "id": "feed", "method": "SUBSCRIPTION" })).unwrap();
        assert_eq!(ds.socket_protocol(), SocketProtocol::GraphqlTransportWs);

        let legacy: DataSource = serde_json::from_value(json!({
            "id": "feed",
            "method": "SUBSCRIPTION",
            "socket": { "protocol": "graphql-ws" }
        }))
        .unwrap();
        assert_eq!(legacy.socket_protocol(), SocketProtocol::GraphqlWs);
    }

    #[test]
    fn query_is_params_or_document() {
        let rest: DataSource = serde_json::from_value(json!({ "id": "r", "query": { "page": 1 } })).unwrap();
        assert_eq!(rest.query_params().unwrap()["page"], 1);
        assert!(rest.graphql_document().is_none());

        let gql: DataSource = serde_json::from_value(json!({ "id": "g", "method": "GRAPHQL", "query": "{ me { id } }" })).unwrap();
        assert_eq!(gql.graphql_document(), Some("{ me { id } }"));
    }

    #[test]
    fn mapping_matches_source_ids() {
        let mapping = DataMapping {
            source_ids: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        assert!(mapping.applies_to("b"));
        assert!(!mapping.applies_to("c"));
    }
}
