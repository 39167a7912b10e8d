//! Transport seams used by the Tessera runtime.
//!
//! The engine never talks to the network directly. It builds an [`HttpRequest`]
//! and hands it to an [`HttpTransport`], or asks a [`SocketConnector`] for a
//! [`SocketChannel`]. Production code uses [`ReqwestTransport`] and
//! [`WsConnector`]; tests substitute in-memory implementations.
//!
//! Responses are decoded with [`ResponsePayload::classify`], which inspects
//! `Content-Type` and `Content-Disposition` to decide between JSON, text and
//! binary payloads.

mod error;
mod http;
mod response;
mod socket;

pub use error::ApiError;
pub use http::{FormPart, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody};
pub use reqwest::Method;
pub use response::ResponsePayload;
pub use socket::{SocketChannel, SocketConnector, SocketEvent, SocketFrame, SocketPeer, WsConnector};
