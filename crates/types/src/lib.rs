//! # Tessera Types
//!
//! Shared, serde-backed definitions of the declarative schema consumed by the
//! Tessera runtime: event handlers and their continuation chains, remote data
//! source descriptors, result mappings, retry policies and runtime settings.
//!
//! Every type deserializes from the camelCase JSON/YAML produced by schema
//! authors. Binding-capable fields stay as strings or [`serde_json::Value`] so
//! the engine can resolve them against live state before use.

pub mod action;
pub mod config;
pub mod datasource;
pub mod retry;
pub mod schema;

pub use action::{ActionKind, EventHandler, ModalToggle, OptimisticPatch, ResponseType, ResultMapping, StatePatch, TransitionSpec};
pub use config::RuntimeConfig;
pub use datasource::{AuthSpec, DataMapping, DataSource, HeartbeatSpec, SocketProtocol, SocketSpec, SourceMethod};
pub use retry::{RetrySpec, RetryStrategy};
pub use schema::{GlobalConfig, Schema, SchemaError};
