//! Event handler definitions.
//!
//! An [`EventHandler`] is a declarative action plus optional success and error
//! continuations. Handlers are produced by the schema author, never mutated at
//! runtime, and interpreted by the engine's action executor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::retry::RetrySpec;

/// Every action the executor knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    OpenModal,
    CloseModal,
    OpenDrawer,
    CloseDrawer,
    OpenSidebar,
    CloseSidebar,
    ToggleSidebar,
    UpdateState,
    RunScript,
    CrudCreate,
    CrudRead,
    CrudUpdate,
    CrudDelete,
    ApiCall,
    AuditLog,
    AiGenerate,
    GraphqlQuery,
    GraphqlMutation,
    GraphqlSubscription,
    WebsocketCall,
    ExportFile,
    VoiceCommand,
    InitiateCall,
    WalletConnect,
    WalletSign,
}

impl ActionKind {
    /// Returns the snake_case name used in schema documents and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::OpenModal => "open_modal",
            Self::CloseModal => "close_modal",
            Self::OpenDrawer => "open_drawer",
            Self::CloseDrawer => "close_drawer",
            Self::OpenSidebar => "open_sidebar",
            Self::CloseSidebar => "close_sidebar",
            Self::ToggleSidebar => "toggle_sidebar",
            Self::UpdateState => "update_state",
            Self::RunScript => "run_script",
            Self::CrudCreate => "crud_create",
            Self::CrudRead => "crud_read",
            Self::CrudUpdate => "crud_update",
            Self::CrudDelete => "crud_delete",
            Self::ApiCall => "api_call",
            Self::AuditLog => "audit_log",
            Self::AiGenerate => "ai_generate",
            Self::GraphqlQuery => "graphql_query",
            Self::GraphqlMutation => "graphql_mutation",
            Self::GraphqlSubscription => "graphql_subscription",
            Self::WebsocketCall => "websocket_call",
            Self::ExportFile => "export_file",
            Self::VoiceCommand => "voice_command",
            Self::InitiateCall => "initiate_call",
            Self::WalletConnect => "wallet_connect",
            Self::WalletSign => "wallet_sign",
        }
    }

    /// HTTP verb implied by the action kind when no explicit override exists.
    ///
    /// `api_call` returns `None` so the data source method (or GET) decides.
    pub fn implied_http_verb(&self) -> Option<&'static str> {
        match self {
            Self::CrudCreate | Self::AuditLog | Self::AiGenerate => Some("POST"),
            Self::CrudRead => Some("GET"),
            Self::CrudUpdate => Some("PUT"),
            Self::CrudDelete => Some("DELETE"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an HTTP result is written to state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Only the decoded payload.
    #[default]
    Data,
    /// `{status, headers, data}`.
    Full,
    /// Never written to state.
    None,
}

/// A single `{key, value}` state write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// Modal toggles performed as part of a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalToggle {
    #[serde(default)]
    pub open_id: Option<String>,
    #[serde(default)]
    pub close_id: Option<String>,
}

/// Declarative follow-up executed after an action succeeds or fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSpec {
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub replace: bool,
    #[serde(default)]
    pub modal: Option<ModalToggle>,
    /// Applied in declaration order.
    #[serde(default)]
    pub state_patches: Vec<StatePatch>,
}

impl TransitionSpec {
    pub fn is_empty(&self) -> bool {
        self.href.is_none() && self.modal.is_none() && self.state_patches.is_empty()
    }
}

/// Speculative state write applied before the action outcome is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticPatch {
    pub path: String,
    #[serde(default)]
    pub value: Value,
}

/// Post-processing applied to an action result before it is written to state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMapping {
    /// Dotted path extracted from the raw result first.
    #[serde(default)]
    pub path: Option<String>,
    /// Sandboxed expression evaluated with the extracted value bound to `data`.
    #[serde(default)]
    pub transform: Option<String>,
}

/// Declarative action plus success/error continuations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandler {
    pub action: ActionKind,
    #[serde(default)]
    pub data_source_id: Option<String>,
    /// Action-specific arguments; values may contain bindings.
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub success_action: Option<Box<EventHandler>>,
    #[serde(default)]
    pub error_action: Option<Box<EventHandler>>,
    #[serde(default)]
    pub success_transition: Option<TransitionSpec>,
    #[serde(default)]
    pub error_transition: Option<TransitionSpec>,
    #[serde(default)]
    pub response_type: Option<ResponseType>,
    /// State path that receives the (mapped) result.
    #[serde(default)]
    pub state_path: Option<String>,
    #[serde(default)]
    pub optimistic: Option<OptimisticPatch>,
    #[serde(default)]
    pub result_mapping: Option<ResultMapping>,
    #[serde(default)]
    pub retry: Option<RetrySpec>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Explicit HTTP verb override.
    #[serde(default)]
    pub method: Option<String>,
    /// Absolute URL used when no data source is referenced.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub query: Option<Map<String, Value>>,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
}

impl EventHandler {
    /// Creates a handler for `action` with every optional field empty.
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            data_source_id: None,
            params: Map::new(),
            success_action: None,
            error_action: None,
            success_transition: None,
            error_transition: None,
            response_type: None,
            state_path: None,
            optimistic: None,
            result_mapping: None,
            retry: None,
            timeout_ms: None,
            method: None,
            url: None,
            body: None,
            query: None,
            headers: None,
        }
    }

    /// Reads a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Depth of the success continuation chain, including this handler.
    pub fn chain_len(&self) -> usize {
        1 + self.success_action.as_ref().map(|next| next.chain_len()).unwrap_or(0)
    }
}
