//! # Action executor
//!
//! Interprets declarative [`EventHandler`]s. Every invocation gets its own id
//! and cancellation token from the [`InvocationRegistry`], applies an optional
//! optimistic patch, dispatches on the action kind and then follows either the
//! success path (transition, result write, success continuation) or the error
//! path (revert, error transition, notification, error continuation).
//!
//! Execution never fails outward: the result is an [`ActionOutcome`].

mod export;
mod graphql;
mod http;
mod local;
mod socket;
mod transition;

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tessera_types::{ActionKind, EventHandler};
use tessera_util::format_json_value;
use tracing::{debug, info, warn};

use crate::{
    capability::NotifyLevel,
    context::RuntimeContext,
    error::RuntimeError,
    mapping::apply_result_mapping,
    registry::{InvocationGuard, InvocationId},
};

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The (mapped) result, or `null` when the action produces none.
    Succeeded(Value),
    Failed(String),
    Cancelled,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Result of a dispatched action: `None` when nothing should be written to state.
type DispatchResult = Result<Option<Value>, RuntimeError>;

#[derive(Debug, Clone)]
pub struct ActionExecutor {
    context: Arc<RuntimeContext>,
}

impl ActionExecutor {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Runs `handler` to completion, including its continuations.
    ///
    /// `data` is the triggering payload: its top-level keys are visible to
    /// bindings and it is forwarded unchanged to continuations.
    pub fn execute<'a>(&'a self, handler: &'a EventHandler, data: Option<Value>) -> BoxFuture<'a, ActionOutcome> {
        let guard = self.context.invocations().allocate();
        self.run(guard, handler, data).boxed()
    }

    /// Starts `handler` on a background task and returns its invocation id.
    pub fn spawn(&self, handler: EventHandler, data: Option<Value>) -> InvocationId {
        let guard = self.context.invocations().allocate();
        let id = guard.id();
        let executor = self.clone();
        tokio::spawn(async move {
            let outcome = executor.run(guard, &handler, data).await;
            debug!(invocation_id = id, ?outcome, "spawned invocation finished");
        });
        id
    }

    /// Runs the schema handler registered under `name`.
    pub async fn execute_named(&self, name: &str, data: Option<Value>) -> ActionOutcome {
        let schema = self.context.schema();
        match schema.handler(name) {
            Some(handler) => self.execute(handler, data).await,
            None => {
                warn!(handler = name, "unknown handler");
                ActionOutcome::Failed(RuntimeError::validation(format!("unknown handler '{name}'")).to_string())
            }
        }
    }

    /// Aborts an in-flight invocation and closes its socket, if any.
    pub fn cancel(&self, id: InvocationId) -> bool {
        self.context.invocations().cancel(id)
    }

    /// Cancels every invocation still open; returns how many there were.
    pub fn teardown(&self) -> usize {
        let cancelled = self.context.invocations().cancel_all();
        if cancelled > 0 {
            info!(cancelled, "action executor torn down");
        }
        cancelled
    }

    async fn run(&self, guard: InvocationGuard, handler: &EventHandler, data: Option<Value>) -> ActionOutcome {
        let id = guard.id();
        let token = guard.token().clone();
        let ctx = self.context.as_ref();
        let handler = self.resolve_handler(handler, data.as_ref());
        info!(invocation_id = id, action = %handler.action, "executing action");

        let optimistic = handler.optimistic.as_ref().map(|patch| {
            let previous = ctx.state().set(&patch.path, patch.value.clone());
            debug!(invocation_id = id, path = %patch.path, "applied optimistic patch");
            (patch.path.clone(), previous)
        });

        let mut guard = Some(guard);
        let outcome = self.dispatch(&handler, data.as_ref(), &mut guard).await;
        let cancelled = token.is_cancelled() || matches!(outcome, Err(RuntimeError::Cancelled));

        if cancelled {
            if let Some((path, previous)) = optimistic {
                revert(ctx, &path, previous);
            }
            info!(invocation_id = id, action = %handler.action, "action cancelled");
            return ActionOutcome::Cancelled;
        }

        let outcome = outcome.and_then(|result| {
            result
                .map(|raw| apply_result_mapping(&raw, handler.result_mapping.as_ref()))
                .transpose()
        });
        match outcome {
            Ok(value) => {
                if let Some(spec) = &handler.success_transition {
                    transition::run(ctx, spec, data.as_ref()).await;
                }
                if let (Some(path), Some(value)) = (&handler.state_path, &value) {
                    ctx.state().set(path, value.clone());
                }
                // Streaming invocations hand their guard to the socket task.
                drop(guard);
                info!(invocation_id = id, action = %handler.action, "action succeeded");

                if let Some(next) = &handler.success_action {
                    if token.is_cancelled() {
                        return ActionOutcome::Cancelled;
                    }
                    let _ = self.execute(next, data.clone()).await;
                }
                ActionOutcome::Succeeded(value.unwrap_or(Value::Null))
            }
            Err(error) => {
                drop(guard);
                warn!(invocation_id = id, action = %handler.action, %error, "action failed");
                if let Some((path, previous)) = optimistic {
                    revert(ctx, &path, previous);
                }
                if let Some(spec) = &handler.error_transition {
                    transition::run(ctx, spec, data.as_ref()).await;
                }
                let message = error.to_string();
                ctx.runtime().notify(NotifyLevel::Error, &message).await;
                if let Some(next) = &handler.error_action {
                    let _ = self.execute(next, data.clone()).await;
                }
                ActionOutcome::Failed(message)
            }
        }
    }

    async fn dispatch(&self, handler: &EventHandler, data: Option<&Value>, guard: &mut Option<InvocationGuard>) -> DispatchResult {
        let ctx = &self.context;
        let token = match guard.as_ref() {
            Some(guard) => guard.token().clone(),
            None => return Err(RuntimeError::Cancelled),
        };
        match handler.action {
            ActionKind::Navigate => local::navigate(ctx, handler).await,
            ActionKind::OpenModal
            | ActionKind::CloseModal
            | ActionKind::OpenDrawer
            | ActionKind::CloseDrawer
            | ActionKind::OpenSidebar
            | ActionKind::CloseSidebar
            | ActionKind::ToggleSidebar => local::overlay(ctx, handler).await,
            ActionKind::UpdateState => local::update_state(ctx, handler),
            ActionKind::RunScript => local::run_script(ctx, handler).await,
            ActionKind::CrudCreate
            | ActionKind::CrudRead
            | ActionKind::CrudUpdate
            | ActionKind::CrudDelete
            | ActionKind::ApiCall
            | ActionKind::AuditLog
            | ActionKind::AiGenerate => http::execute(ctx, handler, data, &token).await,
            ActionKind::GraphqlQuery | ActionKind::GraphqlMutation => graphql::execute(ctx, handler, data, &token).await,
            ActionKind::GraphqlSubscription => graphql::subscribe(ctx, handler, data, guard).await,
            ActionKind::WebsocketCall => socket::execute(ctx, handler, data, guard).await,
            ActionKind::ExportFile => export::execute(ctx, handler).await,
            ActionKind::VoiceCommand | ActionKind::InitiateCall | ActionKind::WalletConnect | ActionKind::WalletSign => {
                local::device(ctx, handler).await
            }
        }
    }

    /// Resolves the handler's own bindings. Continuations are resolved when they run.
    fn resolve_handler(&self, handler: &EventHandler, data: Option<&Value>) -> EventHandler {
        let ctx = &self.context;
        let resolve_text = |text: &String| match ctx.resolve(&Value::String(text.clone()), data) {
            Value::String(resolved) => resolved,
            other => format_json_value(&other),
        };

        let mut resolved = handler.clone();
        if let Value::Object(params) = ctx.deep_resolve(&Value::Object(handler.params.clone()), data) {
            resolved.params = params;
        }
        resolved.url = handler.url.as_ref().map(resolve_text);
        resolved.method = handler.method.as_ref().map(resolve_text);
        resolved.state_path = handler.state_path.as_ref().map(resolve_text);
        resolved.body = handler.body.as_ref().map(|body| ctx.deep_resolve(body, data));
        resolved.query = handler.query.as_ref().and_then(|query| match ctx.deep_resolve(&Value::Object(query.clone()), data) {
            Value::Object(map) => Some(map),
            _ => None,
        });
        resolved.headers = handler
            .headers
            .as_ref()
            .and_then(|headers| match ctx.deep_resolve(&Value::Object(headers.clone()), data) {
                Value::Object(map) => Some(map),
                _ => None,
            });
        if let Some(patch) = &mut resolved.optimistic {
            patch.path = resolve_text(&patch.path);
            patch.value = ctx.deep_resolve(&patch.value, data);
        }
        resolved
    }
}

fn revert(ctx: &RuntimeContext, path: &str, previous: Option<Value>) {
    match previous {
        Some(value) => {
            ctx.state().set(path, value);
        }
        None => {
            ctx.state().remove(path);
        }
    }
    debug!(%path, "reverted optimistic patch");
}

/// Maps a collaborator failure into the runtime taxonomy.
fn capability_error(capability: ActionKind, error: anyhow::Error) -> RuntimeError {
    RuntimeError::Capability {
        capability: capability.as_str().to_string(),
        message: format!("{error:#}"),
    }
}
