//! Declarative follow-ups: navigation, modal toggles, ordered state patches.

use serde_json::Value;
use tessera_types::TransitionSpec;
use tessera_util::format_json_value;
use tracing::warn;

use crate::context::RuntimeContext;

/// Runs `spec` against current state. Collaborator failures are logged and do
/// not change the invocation outcome.
pub(super) async fn run(ctx: &RuntimeContext, spec: &TransitionSpec, data: Option<&Value>) {
    let text = |raw: &str| format_json_value(&ctx.resolve(&Value::String(raw.to_string()), data));

    if let Some(href) = &spec.href
        && let Err(error) = ctx.runtime().navigate(&text(href), spec.replace).await
    {
        warn!(error = %format!("{error:#}"), "transition failed to navigate");
    }

    if let Some(modal) = &spec.modal {
        if let Some(close_id) = &modal.close_id
            && let Err(error) = ctx.runtime().close_modal(&text(close_id)).await
        {
            warn!(error = %format!("{error:#}"), "transition failed to close modal");
        }
        if let Some(open_id) = &modal.open_id
            && let Err(error) = ctx.runtime().open_modal(&text(open_id)).await
        {
            warn!(error = %format!("{error:#}"), "transition failed to open modal");
        }
    }

    for patch in &spec.state_patches {
        let value = ctx.deep_resolve(&patch.value, data);
        ctx.state().set(&text(&patch.key), value);
    }
}
