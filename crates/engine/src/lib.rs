//! # Tessera Engine
//!
//! The Tessera engine turns a declarative schema into live behaviour. It
//! resolves bindings against application state, executes event handlers and
//! keeps data sources fresh.
//!
//! ## Key Features
//!
//! - **Binding resolution**: `{{ path }}`, `{{ expr }}`, `${ENV}`, `env.NAME`
//!   and `t('key')` placeholders, resolved recursively with a cycle guard
//! - **Action execution**: HTTP, GraphQL, sockets, navigation, overlays,
//!   state updates, scripts, exports and device capabilities, with retries,
//!   optimistic updates, transitions and chained continuations
//! - **Data sources**: one-shot, polled and streamed descriptors whose
//!   results are mapped and published to subscribers
//! - **Cancellation**: every invocation and mounted source can be cancelled;
//!   teardown releases timers, requests and sockets
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tessera_engine::{ActionExecutor, DataSourceEngine, RuntimeContext, load_schema_file};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let schema = load_schema_file("app.yaml")?;
//! let context = RuntimeContext::builder(schema).build()?;
//!
//! let sources = DataSourceEngine::new(context.clone());
//! sources.mount();
//!
//! let actions = ActionExecutor::new(context);
//! let outcome = actions.execute_named("save", None).await;
//! println!("{outcome:?}");
//!
//! sources.teardown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`resolve`** / **`expr`** / **`scope`**: placeholder resolution and the
//!   restricted expression language
//! - **`context`**: the shared runtime context and descriptor resolution
//! - **`action`**: the action executor
//! - **`datasource`**: the data source engine and its results map
//! - **`request`** / **`stream`** / **`retry`**: HTTP, socket and retry plumbing
//!   shared by actions and data sources

use std::{fs, path::Path};

use anyhow::{Context, Result};
use tessera_types::Schema;

pub mod action;
pub mod capability;
pub mod context;
pub mod datasource;
pub mod environment;
pub mod error;
pub mod expr;
pub mod mapping;
pub mod registry;
pub mod request;
pub mod resolve;
pub mod retry;
pub mod scope;
pub mod state;
pub mod stream;

pub use action::{ActionExecutor, ActionOutcome};
pub use capability::{ActionRuntime, MapTranslator, NotifyLevel, NullActionRuntime, NullTranslator, Translator};
pub use context::{RuntimeContext, RuntimeContextBuilder};
pub use datasource::{DataSourceEngine, DataSourceResults, ResultUpdate};
pub use environment::Environment;
pub use error::RuntimeError;
pub use registry::{InvocationGuard, InvocationId, InvocationRegistry};
pub use resolve::{BindingResolver, ResolveCache};
pub use retry::RetryCoordinator;
pub use state::{MemoryStateStore, StateStore};

/// Loads and validates a schema document.
///
/// `.json` files are parsed as JSON; anything else is parsed as YAML, which
/// also accepts JSON content.
pub fn load_schema_file(file_path: impl AsRef<Path>) -> Result<Schema> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read schema file: {}", file_path.display()))?;

    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let schema: Schema = if is_json {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON schema: {}", file_path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML schema: {}", file_path.display()))?
    };

    schema
        .validate()
        .with_context(|| format!("schema failed validation: {}", file_path.display()))?;
    Ok(schema)
}
