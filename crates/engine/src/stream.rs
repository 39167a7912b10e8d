//! Duplex-socket sessions: the GraphQL subscription handshake in both wire
//! variants, frame decoding, heartbeats and the cancellable receive loop.

use std::{future, time::Duration};

use serde_json::{Value, json};
use tessera_api::{SocketChannel, SocketConnector, SocketEvent};
use tessera_types::{HeartbeatSpec, SocketProtocol};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// How a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Cancelled,
    /// The server completed the stream or the handler asked to stop.
    Completed,
    Closed { clean: bool },
}

/// What the receive loop should do after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAction {
    Continue,
    Reply(Value),
    Stop,
}

/// One decoded subscription frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionFrame {
    Data(Value),
    Error(String),
    Complete,
    Ping(Option<Value>),
    KeepAlive,
    Other,
}

pub async fn connect(
    connector: &dyn SocketConnector,
    url: &str,
    protocol: SocketProtocol,
    token: &CancellationToken,
) -> Result<SocketChannel, RuntimeError> {
    debug!(%url, subprotocol = ?protocol.subprotocol(), "opening socket");
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RuntimeError::Cancelled),
        channel = connector.connect(url, protocol.subprotocol()) => Ok(channel?),
    }
}

/// Sends `connection_init` and waits for `connection_ack`.
pub async fn handshake(
    channel: &mut SocketChannel,
    connection_params: Option<&Value>,
    ack_timeout: Duration,
    token: &CancellationToken,
) -> Result<(), RuntimeError> {
    let init = json!({
        "type": "connection_init",
        "payload": connection_params.cloned().unwrap_or_else(|| json!({})),
    });
    if !channel.send_json(&init) {
        return Err(RuntimeError::Socket("socket closed before connection_init".into()));
    }

    let wait_for_ack = async {
        loop {
            match channel.next().await {
                Some(SocketEvent::Message(text)) => {
                    let frame: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                    match frame.get("type").and_then(Value::as_str) {
                        Some("connection_ack") => return Ok(()),
                        Some("ping") => {
                            channel.send_json(&json!({ "type": "pong" }));
                        }
                        Some("connection_error") => {
                            return Err(RuntimeError::Socket(format!("connection rejected: {}", frame["payload"])));
                        }
                        _ => debug!(frame = %text, "ignoring frame before connection_ack"),
                    }
                }
                Some(SocketEvent::Error(message)) => return Err(RuntimeError::Socket(message)),
                Some(SocketEvent::Closed { code, .. }) => {
                    return Err(RuntimeError::Socket(format!("socket closed during handshake (code {code:?})")));
                }
                None => return Err(RuntimeError::Socket("socket closed during handshake".into())),
            }
        }
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RuntimeError::Cancelled),
        outcome = tokio::time::timeout(ack_timeout, wait_for_ack) => match outcome {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Socket("timed out waiting for connection_ack".into())),
        },
    }
}

/// `subscribe` (graphql-transport-ws) or `start` (graphql-ws) frame.
pub fn subscribe_frame(protocol: SocketProtocol, id: &str, payload: Value) -> Value {
    let kind = match protocol {
        SocketProtocol::GraphqlWs => "start",
        SocketProtocol::GraphqlTransportWs | SocketProtocol::Raw => "subscribe",
    };
    json!({ "id": id, "type": kind, "payload": payload })
}

pub fn decode_subscription_frame(text: &str) -> SubscriptionFrame {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return SubscriptionFrame::Other;
    };
    match frame.get("type").and_then(Value::as_str) {
        Some("next" | "data") => {
            let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
            if let Some(errors) = payload.get("errors").and_then(Value::as_array)
                && !errors.is_empty()
            {
                return SubscriptionFrame::Error(first_error_message(&Value::Array(errors.clone())));
            }
            SubscriptionFrame::Data(payload.get("data").cloned().unwrap_or(Value::Null))
        }
        Some("error") => SubscriptionFrame::Error(first_error_message(frame.get("payload").unwrap_or(&Value::Null))),
        Some("complete") => SubscriptionFrame::Complete,
        Some("ping") => SubscriptionFrame::Ping(frame.get("payload").cloned()),
        Some("ka" | "pong") => SubscriptionFrame::KeepAlive,
        _ => SubscriptionFrame::Other,
    }
}

fn first_error_message(payload: &Value) -> String {
    let first = match payload {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    first
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| first.to_string())
}

/// Raw socket frames are JSON when they parse, text otherwise.
pub fn decode_raw_frame(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Text form of an outgoing frame: strings are sent verbatim, everything else as JSON.
pub fn frame_text(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn heartbeat_interval(spec: Option<&HeartbeatSpec>) -> Option<(Interval, String)> {
    let spec = spec.filter(|spec| spec.interval_ms > 0)?;
    let period = Duration::from_millis(spec.interval_ms);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some((interval, frame_text(&spec.message)))
}

async fn next_heartbeat(heartbeat: &mut Option<(Interval, String)>) -> String {
    match heartbeat {
        Some((interval, message)) => {
            interval.tick().await;
            message.clone()
        }
        None => future::pending().await,
    }
}

/// Receives frames until the socket closes, `on_message` stops, or `token` is cancelled.
///
/// Heartbeat frames are sent while the loop runs. Cancellation closes the socket.
pub async fn pump<F>(channel: &mut SocketChannel, heartbeat: Option<&HeartbeatSpec>, token: &CancellationToken, mut on_message: F) -> StreamEnd
where
    F: FnMut(&str) -> FrameAction,
{
    let mut heartbeat = heartbeat_interval(heartbeat);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                channel.close();
                return StreamEnd::Cancelled;
            }
            event = channel.next() => match event {
                Some(SocketEvent::Message(text)) => match on_message(&text) {
                    FrameAction::Continue => {}
                    FrameAction::Reply(reply) => {
                        channel.send_text(frame_text(&reply));
                    }
                    FrameAction::Stop => {
                        channel.close();
                        return StreamEnd::Completed;
                    }
                },
                Some(SocketEvent::Error(message)) => warn!(%message, "socket error"),
                Some(SocketEvent::Closed { clean, code }) => {
                    debug!(clean, ?code, "socket closed");
                    return StreamEnd::Closed { clean };
                }
                None => return StreamEnd::Closed { clean: false },
            },
            message = next_heartbeat(&mut heartbeat) => {
                debug!("sending heartbeat");
                channel.send_text(message);
            }
        }
    }
}
