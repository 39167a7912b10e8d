//! GraphQL queries and mutations over HTTP, and subscriptions over a socket.

use std::sync::Arc;

use serde_json::{Value, json};
use tessera_api::Method;
use tessera_types::{EventHandler, SocketProtocol};
use tessera_util::to_socket_url;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DispatchResult, http::Target};
use crate::{
    context::RuntimeContext,
    error::RuntimeError,
    mapping::map_frame,
    registry::InvocationGuard,
    request::{self, graphql_data, graphql_payload},
    retry::RetryCoordinator,
    stream::{self, FrameAction, SubscriptionFrame, decode_subscription_frame},
};

fn document<'a>(handler: &'a EventHandler, target: &'a Target) -> Result<&'a str, RuntimeError> {
    ["query", "mutation", "subscription"]
        .iter()
        .find_map(|key| handler.param_str(key))
        .or_else(|| target.descriptor.as_ref().and_then(|source| source.graphql_document()))
        .ok_or_else(|| RuntimeError::validation(format!("{} needs a GraphQL document", handler.action)))
}

fn payload(handler: &EventHandler, target: &Target) -> Result<Value, RuntimeError> {
    let variables = handler
        .params
        .get("variables")
        .or_else(|| target.descriptor.as_ref().and_then(|source| source.variables.as_ref()));
    Ok(graphql_payload(document(handler, target)?, variables, handler.param_str("operationName")))
}

pub(super) async fn execute(
    ctx: &RuntimeContext,
    handler: &EventHandler,
    data: Option<&Value>,
    token: &CancellationToken,
) -> DispatchResult {
    let target = Target::resolve(ctx, handler, data)?;
    let request = target.request(Method::POST).json(payload(handler, &target)?);
    let timeout = target.timeout(ctx, handler);
    let retry = target.retry(handler);
    debug!(action = %handler.action, url = %request.url, "graphql request");

    let transport = ctx.transport();
    let response = RetryCoordinator::run(|| request::send(transport, request.clone(), timeout), &retry, token).await?;
    let data = graphql_data(request::response_data(&response))?;
    Ok(match handler.response_type.unwrap_or_default() {
        tessera_types::ResponseType::None => None,
        _ => Some(data),
    })
}

fn protocol(handler: &EventHandler, target: &Target) -> SocketProtocol {
    if let Some(raw) = handler.param_str("protocol")
        && let Ok(protocol) = serde_json::from_value::<SocketProtocol>(Value::String(raw.to_string()))
        && protocol.is_graphql()
    {
        return protocol;
    }
    match target.descriptor.as_ref().map(|source| source.socket_protocol()) {
        Some(protocol) if protocol.is_graphql() => protocol,
        _ => SocketProtocol::GraphqlTransportWs,
    }
}

/// Opens the subscription and hands the invocation guard to the receive task.
///
/// Returns once the server has acknowledged the connection; each `next`/`data`
/// frame is then mapped and written to the handler's state path.
pub(super) async fn subscribe(
    ctx: &Arc<RuntimeContext>,
    handler: &EventHandler,
    data: Option<&Value>,
    guard: &mut Option<InvocationGuard>,
) -> DispatchResult {
    let target = Target::resolve(ctx, handler, data)?;
    let raw_url = target
        .descriptor
        .as_ref()
        .and_then(|source| source.socket.as_ref())
        .and_then(|socket| socket.url.clone())
        .unwrap_or_else(|| target.url.clone());
    let url = to_socket_url(&raw_url).ok_or_else(|| RuntimeError::validation(format!("'{raw_url}' is not a socket URL")))?;
    let protocol = protocol(handler, &target);
    let connection_params = handler.params.get("connectionParams").cloned().or_else(|| {
        target
            .descriptor
            .as_ref()
            .and_then(|source| source.socket.as_ref())
            .and_then(|socket| socket.connection_params.clone())
    });
    let subscription = payload(handler, &target)?;

    let Some(owned) = guard.take() else {
        return Err(RuntimeError::Cancelled);
    };
    let token = owned.token().clone();
    let mut channel = stream::connect(ctx.connector(), &url, protocol, &token).await?;
    owned.attach_socket(channel.closer());
    stream::handshake(&mut channel, connection_params.as_ref(), ctx.ack_timeout(), &token).await?;

    let subscription_id = owned.id().to_string();
    channel.send_json(&stream::subscribe_frame(protocol, &subscription_id, subscription));
    info!(invocation_id = owned.id(), %url, "subscription started");

    let ctx = Arc::clone(ctx);
    let state_path = handler.state_path.clone();
    let mapping = handler.result_mapping.clone();
    let heartbeat = target.descriptor.as_ref().and_then(|source| source.heartbeat.clone());
    tokio::spawn(async move {
        let end = stream::pump(&mut channel, heartbeat.as_ref(), &token, |text| match decode_subscription_frame(text) {
            SubscriptionFrame::Data(value) => {
                if let Some(path) = &state_path {
                    ctx.state().set(path, map_frame(&value, mapping.as_ref()));
                }
                FrameAction::Continue
            }
            SubscriptionFrame::Error(message) => {
                warn!(invocation_id = owned.id(), %message, "subscription error frame");
                FrameAction::Continue
            }
            SubscriptionFrame::Complete => FrameAction::Stop,
            SubscriptionFrame::Ping(_) => FrameAction::Reply(json!({ "type": "pong" })),
            SubscriptionFrame::KeepAlive | SubscriptionFrame::Other => FrameAction::Continue,
        })
        .await;
        info!(invocation_id = owned.id(), ?end, "subscription ended");
    });
    Ok(None)
}
