#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tessera_api::{ApiError, HttpRequest, HttpResponse, HttpTransport, SocketChannel, SocketConnector, SocketPeer};
use tessera_engine::{ActionRuntime, Environment, NotifyLevel, RuntimeContext};
use tessera_types::Schema;
use tokio::sync::mpsc;
use tokio::time::Instant;

type Responder = dyn Fn(&HttpRequest, usize) -> Result<HttpResponse, ApiError> + Send + Sync;
type Latency = dyn Fn(usize) -> Duration + Send + Sync;

/// Transport that answers from a closure and records every request with its
/// arrival time.
pub struct FakeTransport {
    responder: Box<Responder>,
    latency: Box<Latency>,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl FakeTransport {
    pub fn new(responder: impl Fn(&HttpRequest, usize) -> Result<HttpResponse, ApiError> + Send + Sync + 'static) -> Arc<Self> {
        Self::with_latency(|_| Duration::ZERO, responder)
    }

    /// Delays each answer by `latency(call)` before responding.
    pub fn with_latency(
        latency: impl Fn(usize) -> Duration + Send + Sync + 'static,
        responder: impl Fn(&HttpRequest, usize) -> Result<HttpResponse, ApiError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            latency: Box::new(latency),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answers `status` with `body` as JSON.
    pub fn fixed(status: u16, body: Value) -> Arc<Self> {
        Self::new(move |_, _| Ok(HttpResponse::json(status, &body)))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|(_, request)| request.url.clone()).collect()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push((Instant::now(), request.clone()));
        let latency = (self.latency)(call);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        (self.responder)(&request, call)
    }
}

/// Connector that hands the remote half of every socket to the test.
pub struct FakeConnector {
    peers_tx: mpsc::UnboundedSender<SocketPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SocketPeer>>,
    pub connections: Mutex<Vec<(String, Option<String>)>>,
    failures_left: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Refuses the first `failures` connection attempts.
    pub fn failing(failures: usize) -> Arc<Self> {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            peers_tx,
            peers_rx: tokio::sync::Mutex::new(peers_rx),
            connections: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(failures),
        })
    }

    /// Waits for the next socket the runtime opens.
    pub async fn next_peer(&self) -> SocketPeer {
        self.peers_rx.lock().await.recv().await.expect("connector dropped")
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl SocketConnector for FakeConnector {
    async fn connect(&self, url: &str, subprotocol: Option<&str>) -> Result<SocketChannel, ApiError> {
        self.connections.lock().push((url.to_string(), subprotocol.map(str::to_string)));
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Socket("connection refused".into()));
        }
        let (channel, peer) = SocketChannel::pair();
        let _ = self.peers_tx.send(peer);
        Ok(channel)
    }
}

/// Records every capability call as `"<name>:<argument>"`.
#[derive(Default)]
pub struct RecordingRuntime {
    pub calls: Mutex<Vec<String>>,
    pub exports: Mutex<Vec<(String, String, Bytes)>>,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.calls().into_iter().filter(|call| call.starts_with("notify:")).collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ActionRuntime for RecordingRuntime {
    async fn navigate(&self, href: &str, replace: bool) -> Result<()> {
        self.record(format!("navigate:{href}:{replace}"));
        Ok(())
    }

    async fn open_modal(&self, id: &str) -> Result<()> {
        self.record(format!("open_modal:{id}"));
        Ok(())
    }

    async fn close_modal(&self, id: &str) -> Result<()> {
        self.record(format!("close_modal:{id}"));
        Ok(())
    }

    async fn open_drawer(&self, id: &str) -> Result<()> {
        self.record(format!("open_drawer:{id}"));
        Ok(())
    }

    async fn close_drawer(&self, id: &str) -> Result<()> {
        self.record(format!("close_drawer:{id}"));
        Ok(())
    }

    async fn open_sidebar(&self, id: &str) -> Result<()> {
        self.record(format!("open_sidebar:{id}"));
        Ok(())
    }

    async fn close_sidebar(&self, id: &str) -> Result<()> {
        self.record(format!("close_sidebar:{id}"));
        Ok(())
    }

    async fn toggle_sidebar(&self, id: &str) -> Result<()> {
        self.record(format!("toggle_sidebar:{id}"));
        Ok(())
    }

    async fn notify(&self, level: NotifyLevel, message: &str) {
        self.record(format!("notify:{level:?}:{message}"));
    }

    async fn run_script(&self, name: &str, args: &Value) -> Result<Value> {
        self.record(format!("run_script:{name}"));
        Ok(serde_json::json!({ "script": name, "args": args }))
    }

    async fn export_file(&self, filename: &str, content_type: &str, bytes: Bytes) -> Result<()> {
        self.record(format!("export_file:{filename}"));
        self.exports.lock().push((filename.to_string(), content_type.to_string(), bytes));
        Ok(())
    }

    async fn voice_command(&self, _params: &Value) -> Result<Value> {
        self.record("voice_command".into());
        Ok(Value::Null)
    }

    async fn initiate_call(&self, _params: &Value) -> Result<Value> {
        self.record("initiate_call".into());
        Ok(Value::Null)
    }

    async fn wallet_connect(&self, _params: &Value) -> Result<Value> {
        self.record("wallet_connect".into());
        anyhow::bail!("no wallet available")
    }

    async fn wallet_sign(&self, _params: &Value) -> Result<Value> {
        self.record("wallet_sign".into());
        Ok(Value::Null)
    }
}

pub fn schema(yaml: &str) -> Schema {
    serde_yaml::from_str(yaml).expect("test schema parses")
}

/// Builds a context wired to the fakes, with an empty process environment.
pub fn context(schema: Schema, transport: Arc<FakeTransport>, connector: Arc<FakeConnector>, runtime: Arc<RecordingRuntime>) -> Arc<RuntimeContext> {
    RuntimeContext::builder(schema)
        .transport(transport)
        .connector(connector)
        .action_runtime(runtime)
        .environment(Environment::default())
        .build()
        .expect("context builds")
}

/// Lets spawned tasks make progress without advancing paused time much.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
