//! Collaborator capabilities the runtime calls but never implements.
//!
//! The surrounding application supplies an [`ActionRuntime`] for navigation,
//! overlays, notifications and device integrations, plus a [`Translator`] for
//! i18n lookups. Null implementations log and return `null` so the engine can
//! run headless.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::info;

/// Severity attached to user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Error,
}

/// UI and device capabilities exposed to actions.
#[async_trait]
pub trait ActionRuntime: Send + Sync {
    async fn navigate(&self, href: &str, replace: bool) -> Result<()>;
    async fn open_modal(&self, id: &str) -> Result<()>;
    async fn close_modal(&self, id: &str) -> Result<()>;
    async fn open_drawer(&self, id: &str) -> Result<()>;
    async fn close_drawer(&self, id: &str) -> Result<()>;
    async fn open_sidebar(&self, id: &str) -> Result<()>;
    async fn close_sidebar(&self, id: &str) -> Result<()>;
    async fn toggle_sidebar(&self, id: &str) -> Result<()>;
    async fn notify(&self, level: NotifyLevel, message: &str);
    /// Invokes an allow-listed script with resolved arguments.
    async fn run_script(&self, name: &str, args: &Value) -> Result<Value>;
    async fn export_file(&self, filename: &str, content_type: &str, bytes: Bytes) -> Result<()>;
    async fn voice_command(&self, params: &Value) -> Result<Value>;
    async fn initiate_call(&self, params: &Value) -> Result<Value>;
    async fn wallet_connect(&self, params: &Value) -> Result<Value>;
    async fn wallet_sign(&self, params: &Value) -> Result<Value>;
}

/// [`ActionRuntime`] that only logs.
#[derive(Debug, Clone, Default)]
pub struct NullActionRuntime;

#[async_trait]
impl ActionRuntime for NullActionRuntime {
    async fn navigate(&self, href: &str, replace: bool) -> Result<()> {
        info!(%href, replace, "navigate");
        Ok(())
    }

    async fn open_modal(&self, id: &str) -> Result<()> {
        info!(%id, "open modal");
        Ok(())
    }

    async fn close_modal(&self, id: &str) -> Result<()> {
        info!(%id, "close modal");
        Ok(())
    }

    async fn open_drawer(&self, id: &str) -> Result<()> {
        info!(%id, "open drawer");
        Ok(())
    }

    async fn close_drawer(&self, id: &str) -> Result<()> {
        info!(%id, "close drawer");
        Ok(())
    }

    async fn open_sidebar(&self, id: &str) -> Result<()> {
        info!(%id, "open sidebar");
        Ok(())
    }

    async fn close_sidebar(&self, id: &str) -> Result<()> {
        info!(%id, "close sidebar");
        Ok(())
    }

    async fn toggle_sidebar(&self, id: &str) -> Result<()> {
        info!(%id, "toggle sidebar");
        Ok(())
    }

    async fn notify(&self, level: NotifyLevel, message: &str) {
        info!(?level, %message, "notify");
    }

    async fn run_script(&self, name: &str, _args: &Value) -> Result<Value> {
        info!(%name, "run script");
        Ok(Value::Null)
    }

    async fn export_file(&self, filename: &str, content_type: &str, bytes: Bytes) -> Result<()> {
        info!(%filename, %content_type, size = bytes.len(), "export file");
        Ok(())
    }

    async fn voice_command(&self, _params: &Value) -> Result<Value> {
        info!("voice command");
        Ok(Value::Null)
    }

    async fn initiate_call(&self, _params: &Value) -> Result<Value> {
        info!("initiate call");
        Ok(Value::Null)
    }

    async fn wallet_connect(&self, _params: &Value) -> Result<Value> {
        info!("wallet connect");
        Ok(Value::Null)
    }

    async fn wallet_sign(&self, _params: &Value) -> Result<Value> {
        info!("wallet sign");
        Ok(Value::Null)
    }
}

/// `t(key)` lookup contract.
pub trait Translator: Send + Sync {
    /// Returns `None` when no translation exists for `key`.
    fn translate(&self, key: &str, locale: Option<&str>) -> Option<String>;
}

/// Translator with no dictionary.
#[derive(Debug, Clone, Default)]
pub struct NullTranslator;

impl Translator for NullTranslator {
    fn translate(&self, _key: &str, _locale: Option<&str>) -> Option<String> {
        None
    }
}

/// Dictionary-backed translator keyed by locale, then key.
#[derive(Debug, Clone, Default)]
pub struct MapTranslator {
    default_locale: String,
    entries: HashMap<String, HashMap<String, String>>,
}

impl MapTranslator {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, locale: &str, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(locale.to_string())
            .or_default()
            .insert(key.into(), value.into());
    }

    pub fn with(mut self, locale: &str, key: &str, value: &str) -> Self {
        self.insert(locale, key, value);
        self
    }
}

impl Translator for MapTranslator {
    fn translate(&self, key: &str, locale: Option<&str>) -> Option<String> {
        let locale = locale.unwrap_or(&self.default_locale);
        self.entries.get(locale)?.get(key).cloned()
    }
}
