//! The schema document consumed by a runtime context.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    action::EventHandler,
    config::RuntimeConfig,
    datasource::{AuthSpec, DataMapping, DataSource},
};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("duplicate data source id '{id}'")]
    DuplicateDataSource { id: String },

    #[error("data source '{id}' references unknown global descriptor '{reference}'")]
    UnknownReference { id: String, reference: String },

    #[error("data mapping #{index} has no source ids")]
    EmptyMapping { index: usize },
}

/// Settings shared by every data source in the schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Headers merged under every descriptor's own headers.
    #[serde(default)]
    pub default_headers: Map<String, Value>,
    /// Auth used when a descriptor declares none.
    #[serde(default)]
    pub auth: Option<AuthSpec>,
    /// Descriptors other descriptors may inherit from via `ref`.
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    /// Partial descriptors keyed by environment name, then data source id.
    #[serde(default)]
    pub environments: IndexMap<String, IndexMap<String, Value>>,
}

impl GlobalConfig {
    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.data_sources.iter().find(|source| source.id == id)
    }

    /// Override object for `data_source_id` under `environment`.
    pub fn environment_override(&self, environment: &str, data_source_id: &str) -> Option<&Value> {
        self.environments.get(environment)?.get(data_source_id)
    }
}

/// A complete declarative schema: runtime settings, data sources, mappings and
/// named handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub data_sources: Vec<DataSource>,
    /// Applied in declaration order.
    #[serde(default)]
    pub data_mappings: Vec<DataMapping>,
    #[serde(default)]
    pub handlers: IndexMap<String, EventHandler>,
}

impl Schema {
    /// Looks up a descriptor, preferring local declarations over globals.
    pub fn data_source(&self, id: &str) -> Option<&DataSource> {
        self.data_sources
            .iter()
            .find(|source| source.id == id)
            .or_else(|| self.global.data_source(id))
    }

    pub fn handler(&self, name: &str) -> Option<&EventHandler> {
        self.handlers.get(name)
    }

    /// Mappings that apply to `data_source_id`, in declaration order.
    pub fn mappings_for<'a>(&'a self, data_source_id: &'a str) -> impl Iterator<Item = &'a DataMapping> + 'a {
        self.data_mappings
            .iter()
            .filter(move |mapping| mapping.applies_to(data_source_id))
    }

    /// Structural checks that do not depend on runtime state.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.data_sources {
            if !seen.insert(source.id.as_str()) {
                return Err(SchemaError::DuplicateDataSource { id: source.id.clone() });
            }
            if let Some(reference) = &source.reference
                && self.global.data_source(reference).is_none()
            {
                return Err(SchemaError::UnknownReference {
                    id: source.id.clone(),
                    reference: reference.clone(),
                });
            }
        }
        for (index, mapping) in self.data_mappings.iter().enumerate() {
            if mapping.source_ids.is_empty() {
                return Err(SchemaError::EmptyMapping { index });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
runtime:
  maxResolveDepth: 6
  allowedScripts: [recalc]
global:
  defaultHeaders:
    X-Client: tessera
  auth:
    type: bearer
    token: "{{auth.token}}"
  dataSources:
    - id: api
      baseUrl: https://api.example.com/
  environments:
    staging:
      items:
        baseUrl: https://staging.example.com/
dataSources:
  - id: items
    ref: api
    path: items
    pollingInterval: 1000
dataMappings:
  - sourceIds: [items]
    transform: "data.length"
    outputKey: itemCount
handlers:
  loadItems:
    action: crud_read
    dataSourceId: items
    statePath: items
"#;

    #[test]
    fn parses_full_document() {
        let schema: Schema = serde_yaml::from_str(DOCUMENT).expect("schema parses");
        assert_eq!(schema.runtime.max_resolve_depth, 6);
        assert!(schema.runtime.is_script_allowed("recalc"));
        assert_eq!(schema.data_sources[0].polling_interval, Some(1000));
        assert_eq!(schema.data_source("api").map(|s| s.base_url.as_str()), Some("https://api.example.com/"));
        assert!(schema.global.environment_override("staging", "items").is_some());
        assert_eq!(schema.mappings_for("items").count(), 1);
        assert!(schema.handler("loadItems").is_some());
        schema.validate().expect("schema is valid");
    }

    #[test]
    fn validate_rejects_unknown_reference() {
        let mut schema: Schema = serde_yaml::from_str(DOCUMENT).unwrap();
        schema.data_sources[0].reference = Some("missing".into());
        assert!(matches!(schema.validate(), Err(SchemaError::UnknownReference { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let mut schema: Schema = serde_yaml::from_str(DOCUMENT).unwrap();
        let duplicate = schema.data_sources[0].clone();
        schema.data_sources.push(duplicate);
        assert!(matches!(schema.validate(), Err(SchemaError::DuplicateDataSource { .. })));
    }
}
