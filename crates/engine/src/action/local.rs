//! Actions served by the host application or the state store: navigation,
//! overlays, state updates, scripts and device integrations.

use serde_json::Value;
use tessera_types::{ActionKind, EventHandler};
use tracing::debug;

use super::{DispatchResult, capability_error};
use crate::{context::RuntimeContext, error::RuntimeError};

fn required_str<'a>(handler: &'a EventHandler, keys: &[&str]) -> Result<&'a str, RuntimeError> {
    keys.iter()
        .find_map(|key| handler.param_str(key))
        .ok_or_else(|| RuntimeError::validation(format!("{} requires '{}'", handler.action, keys[0])))
}

pub(super) async fn navigate(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let href = required_str(handler, &["href", "url", "path"])?;
    let replace = handler.params.get("replace").and_then(Value::as_bool).unwrap_or(false);
    ctx.runtime()
        .navigate(href, replace)
        .await
        .map_err(|error| capability_error(handler.action, error))?;
    Ok(None)
}

pub(super) async fn overlay(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let id = required_str(handler, &["id", "modalId", "drawerId", "sidebarId"])?;
    let runtime = ctx.runtime();
    let outcome = match handler.action {
        ActionKind::OpenModal => runtime.open_modal(id).await,
        ActionKind::CloseModal => runtime.close_modal(id).await,
        ActionKind::OpenDrawer => runtime.open_drawer(id).await,
        ActionKind::CloseDrawer => runtime.close_drawer(id).await,
        ActionKind::OpenSidebar => runtime.open_sidebar(id).await,
        ActionKind::CloseSidebar => runtime.close_sidebar(id).await,
        ActionKind::ToggleSidebar => runtime.toggle_sidebar(id).await,
        other => return Err(RuntimeError::validation(format!("{other} is not an overlay action"))),
    };
    outcome.map_err(|error| capability_error(handler.action, error))?;
    Ok(None)
}

/// Accepts `{key, value}`, `patches: [{key, value}]` and `updates: {path: value}`, applied in that order.
pub(super) fn update_state(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let state = ctx.state();
    let mut written = 0usize;

    if let Some(key) = handler.param_str("key") {
        state.set(key, handler.params.get("value").cloned().unwrap_or(Value::Null));
        written += 1;
    }
    if let Some(patches) = handler.params.get("patches").and_then(Value::as_array) {
        for patch in patches {
            let key = patch
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| RuntimeError::validation("state patch without a key"))?;
            state.set(key, patch.get("value").cloned().unwrap_or(Value::Null));
            written += 1;
        }
    }
    if let Some(updates) = handler.params.get("updates").and_then(Value::as_object) {
        for (path, value) in updates {
            state.set(path, value.clone());
            written += 1;
        }
    }

    if written == 0 {
        return Err(RuntimeError::validation("update_state has nothing to write"));
    }
    debug!(written, "state updated");
    Ok(None)
}

pub(super) async fn run_script(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let name = required_str(handler, &["name", "script"])?;
    if !ctx.config().is_script_allowed(name) {
        return Err(RuntimeError::Capability {
            capability: handler.action.as_str().to_string(),
            message: format!("script '{name}' is not allowed"),
        });
    }
    let args = handler.params.get("args").cloned().unwrap_or(Value::Null);
    let result = ctx
        .runtime()
        .run_script(name, &args)
        .await
        .map_err(|error| capability_error(handler.action, error))?;
    Ok(Some(result))
}

pub(super) async fn device(ctx: &RuntimeContext, handler: &EventHandler) -> DispatchResult {
    let params = Value::Object(handler.params.clone());
    let runtime = ctx.runtime();
    let outcome = match handler.action {
        ActionKind::VoiceCommand => runtime.voice_command(&params).await,
        ActionKind::InitiateCall => runtime.initiate_call(&params).await,
        ActionKind::WalletConnect => runtime.wallet_connect(&params).await,
        ActionKind::WalletSign => runtime.wallet_sign(&params).await,
        other => return Err(RuntimeError::validation(format!("{other} is not a device action"))),
    };
    outcome.map(Some).map_err(|error| capability_error(handler.action, error))
}
