//! The runtime context: schema, collaborators and every piece of per-runtime
//! mutable state (resolve cache, data source results, invocation registry).
//!
//! A context is built once with [`RuntimeContext::builder`] and shared as an
//! `Arc` by the action executor and the data source engine. Nothing is shared
//! across contexts.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tessera_api::{HttpTransport, ReqwestTransport, SocketConnector, WsConnector};
use tessera_types::{DataSource, RuntimeConfig, Schema, SchemaError, SourceMethod};
use tessera_util::deep_merge;
use tracing::debug;

use crate::{
    capability::{ActionRuntime, NullActionRuntime, NullTranslator, Translator},
    datasource::DataSourceResults,
    environment::Environment,
    error::RuntimeError,
    registry::InvocationRegistry,
    resolve::{BindingResolver, ResolveCache},
    state::{MemoryStateStore, StateStore},
};

pub struct RuntimeContext {
    schema: RwLock<Arc<Schema>>,
    config: RuntimeConfig,
    state: Arc<dyn StateStore>,
    runtime: Arc<dyn ActionRuntime>,
    transport: Arc<dyn HttpTransport>,
    connector: Arc<dyn SocketConnector>,
    translator: Arc<dyn Translator>,
    environment: Environment,
    locale: Option<String>,
    cache: ResolveCache,
    results: DataSourceResults,
    invocations: Arc<InvocationRegistry>,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.config)
            .field("locale", &self.locale)
            .field("cached_bindings", &self.cache.len())
            .field("active_invocations", &self.invocations.active())
            .finish()
    }
}

impl RuntimeContext {
    pub fn builder(schema: Schema) -> RuntimeContextBuilder {
        RuntimeContextBuilder::new(schema)
    }

    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema.read())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> &dyn StateStore {
        self.state.as_ref()
    }

    pub fn runtime(&self) -> &dyn ActionRuntime {
        self.runtime.as_ref()
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub fn connector(&self) -> &dyn SocketConnector {
        self.connector.as_ref()
    }

    pub fn results(&self) -> &DataSourceResults {
        &self.results
    }

    pub fn invocations(&self) -> &Arc<InvocationRegistry> {
        &self.invocations
    }

    pub fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    /// Default per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    /// How long subscription sockets wait for `connection_ack`.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.config.ack_timeout_ms)
    }

    /// Swaps in a new schema and drops every memoized binding.
    pub fn reload_schema(&self, schema: Schema) -> Result<(), SchemaError> {
        schema.validate()?;
        *self.schema.write() = Arc::new(schema);
        self.cache.clear();
        debug!("schema reloaded; resolve cache cleared");
        Ok(())
    }

    /// The state bindings are resolved against: the current state, `ds_*`
    /// results and the top-level keys of `data`, later entries winning.
    pub fn resolution_state(&self, data: Option<&Value>) -> Value {
        let mut root = match self.state.snapshot() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        root.extend(self.results.scope_entries());
        if let Some(Value::Object(overlay)) = data {
            root.extend(overlay.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        Value::Object(root)
    }

    fn resolver<'a>(&'a self, cached: bool) -> BindingResolver<'a> {
        let mut resolver = BindingResolver::new(self.translator.as_ref(), &self.environment, &self.config);
        if cached {
            resolver = resolver.with_cache(&self.cache);
        }
        if let Some(locale) = self.locale.as_deref() {
            resolver = resolver.with_locale(locale);
        }
        resolver
    }

    /// Resolves one binding. Resolution against `data` never touches the cache.
    pub fn resolve(&self, value: &Value, data: Option<&Value>) -> Value {
        let state = self.resolution_state(data);
        self.resolver(data.is_none()).resolve(value, &state)
    }

    /// Resolves every string leaf of `value` until no placeholders remain.
    pub fn deep_resolve(&self, value: &Value, data: Option<&Value>) -> Value {
        let state = self.resolution_state(data);
        self.resolver(data.is_none()).deep_resolve(value, &state)
    }

    /// Produces the effective descriptor for `id`: the referenced global
    /// descriptor, the active environment's override, global default headers
    /// and auth, and finally bindings resolved against current state.
    pub fn resolve_descriptor(&self, id: &str, data: Option<&Value>) -> Result<DataSource, RuntimeError> {
        let schema = self.schema();
        let local = schema
            .data_source(id)
            .ok_or_else(|| RuntimeError::validation(format!("unknown data source '{id}'")))?;

        let mut descriptor = match local.reference.as_deref() {
            Some(reference) => {
                let base = schema
                    .global
                    .data_source(reference)
                    .ok_or_else(|| RuntimeError::validation(format!("data source '{id}' references unknown '{reference}'")))?;
                inherit(base, local)
            }
            None => local.clone(),
        };

        if let Some(environment) = self.config.environment.as_deref()
            && let Some(overlay) = schema.global.environment_override(environment, id)
        {
            descriptor = apply_override(descriptor, overlay)?;
        }

        let mut headers = schema.global.default_headers.clone();
        headers.extend(std::mem::take(&mut descriptor.headers));
        descriptor.headers = headers;
        if descriptor.auth.is_none() {
            descriptor.auth = schema.global.auth.clone();
        }

        self.resolve_descriptor_bindings(descriptor, data)
    }

    fn resolve_descriptor_bindings(&self, descriptor: DataSource, data: Option<&Value>) -> Result<DataSource, RuntimeError> {
        let Value::Object(mut raw) = serde_json::to_value(&descriptor).map_err(|error| RuntimeError::validation(error.to_string()))? else {
            return Err(RuntimeError::validation(format!("data source '{}' is not an object", descriptor.id)));
        };
        // Identity fields and GraphQL documents (which use `{ }` for selection sets) stay literal.
        let mut literal = Map::new();
        for key in ["id", "ref", "method"] {
            if let Some(value) = raw.remove(key) {
                literal.insert(key.to_string(), value);
            }
        }
        if let Some(Value::String(_)) = raw.get("query")
            && let Some(document) = raw.remove("query")
        {
            literal.insert("query".into(), document);
        }

        let mut resolved = match self.deep_resolve(&Value::Object(raw), data) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        resolved.extend(literal);
        serde_json::from_value(Value::Object(resolved))
            .map_err(|error| RuntimeError::validation(format!("data source '{}': {error}", descriptor.id)))
    }
}

/// Fills unset fields of `local` from `base`. Headers merge with local winning.
fn inherit(base: &DataSource, local: &DataSource) -> DataSource {
    let local = local.clone();
    let mut headers = base.headers.clone();
    headers.extend(local.headers);
    DataSource {
        id: local.id,
        reference: local.reference,
        method: if local.method == SourceMethod::default() { base.method } else { local.method },
        base_url: if local.base_url.is_empty() { base.base_url.clone() } else { local.base_url },
        path: if local.path.is_empty() { base.path.clone() } else { local.path },
        headers,
        auth: local.auth.or_else(|| base.auth.clone()),
        body: local.body.or_else(|| base.body.clone()),
        query: local.query.or_else(|| base.query.clone()),
        variables: local.variables.or_else(|| base.variables.clone()),
        polling_interval: local.polling_interval.or(base.polling_interval),
        heartbeat: local.heartbeat.or_else(|| base.heartbeat.clone()),
        retry: local.retry.or_else(|| base.retry.clone()),
        error_key: local.error_key.or_else(|| base.error_key.clone()),
        credentials: local.credentials.or_else(|| base.credentials.clone()),
        socket: local.socket.or_else(|| base.socket.clone()),
        timeout_ms: local.timeout_ms.or(base.timeout_ms),
    }
}

fn apply_override(descriptor: DataSource, overlay: &Value) -> Result<DataSource, RuntimeError> {
    let id = descriptor.id.clone();
    let mut merged = serde_json::to_value(descriptor).map_err(|error| RuntimeError::validation(error.to_string()))?;
    deep_merge(&mut merged, overlay);
    if let Value::Object(map) = &mut merged {
        map.insert("id".into(), Value::String(id.clone()));
    }
    serde_json::from_value(merged).map_err(|error| RuntimeError::validation(format!("environment override for '{id}': {error}")))
}

/// Builds a [`RuntimeContext`], defaulting every collaborator that is not supplied.
pub struct RuntimeContextBuilder {
    schema: Schema,
    config: Option<RuntimeConfig>,
    state: Option<Arc<dyn StateStore>>,
    runtime: Option<Arc<dyn ActionRuntime>>,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn SocketConnector>>,
    translator: Option<Arc<dyn Translator>>,
    environment: Option<Environment>,
    locale: Option<String>,
}

impl RuntimeContextBuilder {
    fn new(schema: Schema) -> Self {
        Self {
            schema,
            config: None,
            state: None,
            runtime: None,
            transport: None,
            connector: None,
            translator: None,
            environment: None,
            locale: None,
        }
    }

    /// Replaces the schema's `runtime` section; environment overrides are not applied.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn initial_state(self, state: Value) -> Self {
        self.state(Arc::new(MemoryStateStore::new(state)))
    }

    pub fn action_runtime(mut self, runtime: Arc<dyn ActionRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn build(self) -> Result<Arc<RuntimeContext>> {
        self.schema.validate().context("invalid schema")?;
        let config = match self.config {
            Some(config) => config,
            None => self.schema.runtime.clone().apply_env_overrides(),
        };
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(Duration::from_millis(config.request_timeout_ms)).context("failed to build HTTP client")?,
            ),
        };

        Ok(Arc::new(RuntimeContext {
            schema: RwLock::new(Arc::new(self.schema)),
            config,
            state: self.state.unwrap_or_else(|| Arc::new(MemoryStateStore::default())),
            runtime: self.runtime.unwrap_or_else(|| Arc::new(NullActionRuntime)),
            transport,
            connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
            translator: self.translator.unwrap_or_else(|| Arc::new(NullTranslator)),
            environment: self.environment.unwrap_or_else(Environment::from_process),
            locale: self.locale,
            cache: ResolveCache::new(),
            results: DataSourceResults::new(),
            invocations: InvocationRegistry::new(),
        }))
    }
}
