//! Raw duplex-socket calls (`websocket_call`).
//!
//! With `awaitReply: true` the call sends its message, waits for the first
//! frame and closes. Otherwise the socket stays open on a background task that
//! writes every inbound frame to the handler's state path until the socket
//! closes or the invocation is cancelled.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tessera_types::{EventHandler, HeartbeatSpec, SocketProtocol};
use tessera_util::to_socket_url;
use tracing::{debug, info};

use super::{DispatchResult, http::Target};
use crate::{
    context::RuntimeContext,
    error::RuntimeError,
    mapping::map_frame,
    registry::InvocationGuard,
    stream::{self, FrameAction, decode_raw_frame, frame_text},
};

fn socket_url(ctx: &RuntimeContext, handler: &EventHandler, data: Option<&Value>) -> Result<(String, Option<HeartbeatSpec>), RuntimeError> {
    let target = Target::resolve(ctx, handler, data)?;
    let descriptor_socket = target.descriptor.as_ref().and_then(|source| source.socket.as_ref());
    let raw = descriptor_socket
        .and_then(|socket| socket.url.clone())
        .unwrap_or_else(|| target.url.clone());
    let url = to_socket_url(&raw).ok_or_else(|| RuntimeError::validation(format!("'{raw}' is not a socket URL")))?;

    let heartbeat = match handler.params.get("heartbeat") {
        Some(raw) => Some(
            serde_json::from_value(raw.clone()).map_err(|error| RuntimeError::validation(format!("invalid heartbeat: {error}")))?,
        ),
        None => target.descriptor.as_ref().and_then(|source| source.heartbeat.clone()),
    };
    Ok((url, heartbeat))
}

pub(super) async fn execute(
    ctx: &Arc<RuntimeContext>,
    handler: &EventHandler,
    data: Option<&Value>,
    guard: &mut Option<InvocationGuard>,
) -> DispatchResult {
    let (url, heartbeat) = socket_url(ctx, handler, data)?;
    let await_reply = handler.params.get("awaitReply").and_then(Value::as_bool).unwrap_or(false);

    let Some(owned) = guard.take() else {
        return Err(RuntimeError::Cancelled);
    };
    let token = owned.token().clone();
    let mut channel = stream::connect(ctx.connector(), &url, SocketProtocol::Raw, &token).await?;
    owned.attach_socket(channel.closer());
    if let Some(message) = handler.params.get("message") {
        channel.send_text(frame_text(message));
    }

    if await_reply {
        let timeout = handler.timeout_ms.map(Duration::from_millis).unwrap_or_else(|| ctx.request_timeout());
        let mut reply = None;
        let end = tokio::time::timeout(
            timeout,
            stream::pump(&mut channel, heartbeat.as_ref(), &token, |text| {
                reply = Some(decode_raw_frame(text));
                FrameAction::Stop
            }),
        )
        .await
        .map_err(|_| RuntimeError::Timeout)?;
        debug!(invocation_id = owned.id(), ?end, "socket call finished");
        return match (end, reply) {
            (stream::StreamEnd::Cancelled, _) => Err(RuntimeError::Cancelled),
            (_, Some(reply)) => Ok(Some(reply)),
            (_, None) => Err(RuntimeError::Socket("socket closed before a reply arrived".into())),
        };
    }

    info!(invocation_id = owned.id(), %url, "socket opened");
    let ctx = Arc::clone(ctx);
    let state_path = handler.state_path.clone();
    let mapping = handler.result_mapping.clone();
    tokio::spawn(async move {
        let end = stream::pump(&mut channel, heartbeat.as_ref(), &token, |text| {
            if let Some(path) = &state_path {
                ctx.state().set(path, map_frame(&decode_raw_frame(text), mapping.as_ref()));
            }
            FrameAction::Continue
        })
        .await;
        info!(invocation_id = owned.id(), ?end, "socket closed");
    });
    Ok(None)
}
