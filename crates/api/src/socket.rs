//! Duplex socket seam and the WebSocket implementation.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest, http::HeaderValue, protocol::frame::coding::CloseCode};
use tracing::{debug, warn};

use crate::ApiError;

/// Frames the runtime writes to a socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Text(String),
    /// Initiates a clean close.
    Close,
}

/// Events a socket reports back to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Message(String),
    Error(String),
    /// Terminal; no further events follow.
    Closed { clean: bool, code: Option<u16> },
}

/// An open socket: a frame sender plus an event receiver.
///
/// Dropping the channel closes the socket.
#[derive(Debug)]
pub struct SocketChannel {
    pub outgoing: mpsc::UnboundedSender<SocketFrame>,
    pub incoming: mpsc::UnboundedReceiver<SocketEvent>,
}

/// The remote half of a [`SocketChannel`] created with [`SocketChannel::pair`].
#[derive(Debug)]
pub struct SocketPeer {
    pub frames: mpsc::UnboundedReceiver<SocketFrame>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketChannel {
    /// Creates a connected channel and its remote half.
    pub fn pair() -> (SocketChannel, SocketPeer) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            SocketChannel {
                outgoing: frame_tx,
                incoming: event_rx,
            },
            SocketPeer {
                frames: frame_rx,
                events: event_tx,
            },
        )
    }

    /// Queues a text frame; returns `false` once the socket is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outgoing.send(SocketFrame::Text(text.into())).is_ok()
    }

    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(SocketFrame::Close);
    }

    pub async fn next(&mut self) -> Option<SocketEvent> {
        self.incoming.recv().await
    }

    /// A cloneable handle that can close this socket from elsewhere.
    pub fn closer(&self) -> mpsc::UnboundedSender<SocketFrame> {
        self.outgoing.clone()
    }
}

/// Opens duplex sockets.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    /// Connects to `url`, optionally negotiating `subprotocol`.
    ///
    /// Returning `Ok` means the socket is open.
    async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<SocketChannel, ApiError>;
}

/// [`SocketConnector`] backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<SocketChannel, ApiError> {
        let mut request = url.into_client_request()?;
        if let Some(protocol) = subprotocol {
            let value = HeaderValue::from_str(protocol).map_err(|error| ApiError::InvalidRequest(error.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        debug!(%url, ?subprotocol, "socket connected");

        let (sink, source) = stream.split();
        let (channel, peer) = SocketChannel::pair();
        tokio::spawn(pump(sink, source, peer));
        Ok(channel)
    }
}

/// Shuttles frames between the runtime and the socket until either side closes.
async fn pump<W, R>(mut sink: W, mut source: R, mut peer: SocketPeer)
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            frame = peer.frames.recv() => match frame {
                Some(SocketFrame::Text(text)) => {
                    if let Err(error) = sink.send(Message::Text(text.into())).await {
                        warn!(%error, "socket write failed");
                        let _ = peer.events.send(SocketEvent::Error(error.to_string()));
                        let _ = peer.events.send(SocketEvent::Closed { clean: false, code: None });
                        break;
                    }
                }
                Some(SocketFrame::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = peer.events.send(SocketEvent::Closed { clean: true, code: Some(1000) });
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = peer.events.send(SocketEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = peer.events.send(SocketEvent::Message(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|frame| u16::from(frame.code));
                    let clean = frame
                        .as_ref()
                        .is_none_or(|frame| matches!(frame.code, CloseCode::Normal | CloseCode::Away));
                    debug!(?code, clean, "socket closed by peer");
                    let _ = peer.events.send(SocketEvent::Closed { clean, code });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "socket read failed");
                    let _ = peer.events.send(SocketEvent::Error(error.to_string()));
                    let _ = peer.events.send(SocketEvent::Closed { clean: false, code: None });
                    break;
                }
                None => {
                    let _ = peer.events.send(SocketEvent::Closed { clean: false, code: Some(1006) });
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paired_channel_routes_both_directions() {
        let (mut channel, mut peer) = SocketChannel::pair();
        assert!(channel.send_json(&serde_json::json!({ "type": "ping" })));
        assert_eq!(peer.frames.recv().await, Some(SocketFrame::Text(r#"{"type":"ping"}"#.into())));

        peer.events.send(SocketEvent::Message("pong".into())).unwrap();
        assert_eq!(channel.next().await, Some(SocketEvent::Message("pong".into())));

        channel.close();
        assert_eq!(peer.frames.recv().await, Some(SocketFrame::Close));
    }

    #[tokio::test]
    async fn send_fails_after_peer_drops() {
        let (channel, peer) = SocketChannel::pair();
        drop(peer);
        assert!(!channel.send_text("hello"));
    }
}
