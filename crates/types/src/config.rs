//! Runtime tuning knobs.
//!
//! Values come from the schema document's `runtime:` section and may be
//! overridden through `TESSERA_*` environment variables.

use std::env;

use serde::{Deserialize, Serialize};

pub const ENVIRONMENT_VAR: &str = "TESSERA_ENVIRONMENT";
pub const REQUEST_TIMEOUT_VAR: &str = "TESSERA_REQUEST_TIMEOUT_MS";
pub const MAX_RESOLVE_DEPTH_VAR: &str = "TESSERA_MAX_RESOLVE_DEPTH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Maximum binding recursion depth before resolution halts.
    pub max_resolve_depth: usize,
    /// Default per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// How long a subscription socket waits for `connection_ack`.
    pub ack_timeout_ms: u64,
    /// First reconnect delay after an unclean socket close.
    pub reconnect_base_ms: u64,
    /// Ceiling for the reconnect delay.
    pub reconnect_max_ms: u64,
    /// Script names `run_script` is allowed to invoke.
    pub allowed_scripts: Vec<String>,
    /// Binding prefixes that are never memoized.
    pub dynamic_prefixes: Vec<String>,
    /// Active environment used to select data source overrides.
    pub environment: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_resolve_depth: 10,
            request_timeout_ms: 30_000,
            ack_timeout_ms: 10_000,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            allowed_scripts: Vec::new(),
            dynamic_prefixes: vec!["state.".into(), "form.".into(), "profile.".into(), "ds_".into()],
            environment: None,
        }
    }
}

impl RuntimeConfig {
    /// Applies `TESSERA_*` environment overrides; unparsable values are ignored.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(environment) = env::var(ENVIRONMENT_VAR)
            && !environment.trim().is_empty()
        {
            self.environment = Some(environment.trim().to_string());
        }
        if let Some(timeout) = env::var(REQUEST_TIMEOUT_VAR).ok().and_then(|raw| raw.trim().parse().ok()) {
            self.request_timeout_ms = timeout;
        }
        if let Some(depth) = env::var(MAX_RESOLVE_DEPTH_VAR).ok().and_then(|raw| raw.trim().parse().ok()) {
            self.max_resolve_depth = depth;
        }
        self
    }

    pub fn is_script_allowed(&self, name: &str) -> bool {
        self.allowed_scripts.iter().any(|allowed| allowed == name)
    }
}
