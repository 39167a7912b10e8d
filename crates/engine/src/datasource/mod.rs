//! # Data source engine
//!
//! Keeps declared remote resources fresh. Each mounted descriptor runs on its
//! own task under a child of the engine's mount token:
//!
//! - plain descriptors fetch once;
//! - descriptors with `pollingInterval` fetch on every tick, each tick under a
//!   fresh token, and only the latest-started fetch that completes may write;
//! - socket descriptors (`WEBSOCKET`, `SUBSCRIPTION`) run an optional setup
//!   call, connect, and stream frames into the results map, reconnecting with
//!   capped exponential backoff after unclean closes.
//!
//! Every value passes through the schema's data mappings before it is stored.
//! Failures are stored as structured errors and written to `errorKey`.
//! [`DataSourceEngine::teardown`] cancels everything and waits for every task.

mod results;

pub use results::{DataSourceResults, ResultUpdate};

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tessera_types::{DataSource, RetrySpec, SocketProtocol, SourceMethod};
use tessera_util::{deep_merge, join_url, to_socket_url};
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    context::RuntimeContext,
    error::RuntimeError,
    mapping::apply_data_mappings,
    request::{self, graphql_data, graphql_payload},
    retry::RetryCoordinator,
    stream::{self, FrameAction, StreamEnd, SubscriptionFrame, decode_raw_frame, decode_subscription_frame, frame_text},
};

#[derive(Debug, Default)]
struct Mounted {
    token: CancellationToken,
    tasks: JoinSet<()>,
    ids: HashSet<String>,
}

#[derive(Debug)]
pub struct DataSourceEngine {
    context: Arc<RuntimeContext>,
    mounted: Mutex<Mounted>,
}

impl DataSourceEngine {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        Self {
            context,
            mounted: Mutex::new(Mounted::default()),
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.context
    }

    /// Mounts every descriptor declared in the schema; returns how many were started.
    pub fn mount(&self) -> usize {
        let schema = self.context.schema();
        schema
            .data_sources
            .iter()
            .filter(|source| self.mount_source(&source.id))
            .count()
    }

    /// Starts the lifecycle task for one descriptor. Already mounted ids are skipped.
    pub fn mount_source(&self, id: &str) -> bool {
        let mut mounted = self.mounted.lock();
        if !mounted.ids.insert(id.to_string()) {
            debug!(data_source_id = id, "data source already mounted");
            return false;
        }
        let ctx = Arc::clone(&self.context);
        let token = mounted.token.child_token();
        let id = id.to_string();
        info!(data_source_id = %id, "mounting data source");
        mounted.tasks.spawn(run_source(ctx, id, token));
        true
    }

    /// Fetches `id` once outside its schedule and stores the result.
    pub async fn refresh(&self, id: &str) -> Result<Value, RuntimeError> {
        let token = self.mounted.lock().token.child_token();
        let descriptor = self.context.resolve_descriptor(id, None)?;
        if descriptor.method.is_socket() {
            return Err(RuntimeError::validation(format!("data source '{id}' is streamed and cannot be refreshed")));
        }
        match fetch(&self.context, &descriptor, &token).await {
            Ok(raw) => Ok(publish(&self.context, &descriptor, raw)),
            Err(error) => {
                if !error.is_cancelled() {
                    store_error(&self.context, id, descriptor.error_key.as_deref(), &error);
                }
                Err(error)
            }
        }
    }

    /// Cancels all timers, requests and sockets, then waits for every task to exit.
    pub async fn teardown(&self) {
        let Mounted { token, mut tasks, ids } = std::mem::take(&mut *self.mounted.lock());
        token.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined
                && error.is_panic()
            {
                warn!(%error, "data source task panicked");
            }
        }
        if !ids.is_empty() {
            info!(count = ids.len(), "data sources torn down");
        }
    }

    /// Tears down and mounts again, e.g. after the schema or its dependencies changed.
    pub async fn remount(&self) -> usize {
        self.teardown().await;
        self.mount()
    }

    pub fn is_mounted(&self, id: &str) -> bool {
        self.mounted.lock().ids.contains(id)
    }
}

async fn run_source(ctx: Arc<RuntimeContext>, id: String, token: CancellationToken) {
    let descriptor = match ctx.resolve_descriptor(&id, None) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            store_error(&ctx, &id, declared_error_key(&ctx, &id).as_deref(), &error);
            return;
        }
    };

    if descriptor.method.is_socket() {
        run_socket(ctx, id, token).await;
    } else if let Some(period) = descriptor.polling_interval.filter(|millis| *millis > 0) {
        run_polling(ctx, id, Duration::from_millis(period), token).await;
    } else {
        fetch_and_store(&ctx, &id, &token, None).await;
    }
}

/// Orders concurrent polling fetches: a result is written only when no
/// later-started fetch has written already.
#[derive(Debug, Default)]
struct Generations {
    started: AtomicU64,
    written: Mutex<u64>,
}

impl Generations {
    fn next(&self) -> u64 {
        self.started.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn write_if_latest(&self, generation: u64, write: impl FnOnce()) -> bool {
        let mut written = self.written.lock();
        if generation <= *written {
            return false;
        }
        *written = generation;
        write();
        true
    }
}

async fn run_polling(ctx: Arc<RuntimeContext>, id: String, period: Duration, token: CancellationToken) {
    let generations = Arc::new(Generations::default());
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inflight = JoinSet::new();
    debug!(data_source_id = %id, period_ms = period.as_millis() as u64, "polling started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
            _ = ticker.tick() => {
                let generation = generations.next();
                let ctx = Arc::clone(&ctx);
                let id = id.clone();
                let tick_token = token.child_token();
                let generations = Arc::clone(&generations);
                inflight.spawn(async move {
                    fetch_and_store(&ctx, &id, &tick_token, Some((&generations, generation))).await;
                });
            }
        }
    }

    while inflight.join_next().await.is_some() {}
    debug!(data_source_id = %id, "polling stopped");
}

async fn fetch_and_store(ctx: &RuntimeContext, id: &str, token: &CancellationToken, generation: Option<(&Generations, u64)>) {
    let outcome = match ctx.resolve_descriptor(id, None) {
        Ok(descriptor) => fetch(ctx, &descriptor, token).await.map(|raw| (descriptor, raw)),
        Err(error) => Err(error),
    };
    let write = |apply: &dyn Fn()| match generation {
        Some((generations, generation)) => {
            if !generations.write_if_latest(generation, apply) {
                debug!(data_source_id = id, generation, "discarding stale poll result");
            }
        }
        None => apply(),
    };

    match outcome {
        Ok((descriptor, raw)) => write(&|| {
            publish(ctx, &descriptor, raw.clone());
        }),
        Err(error) if error.is_cancelled() => debug!(data_source_id = id, "fetch cancelled"),
        Err(error) => {
            let error_key = declared_error_key(ctx, id);
            write(&|| store_error(ctx, id, error_key.as_deref(), &error));
        }
    }
}

/// One request/response round for a REST or GraphQL descriptor, with retry.
async fn fetch(ctx: &RuntimeContext, descriptor: &DataSource, token: &CancellationToken) -> Result<Value, RuntimeError> {
    let retry = descriptor.retry.clone().unwrap_or_else(RetrySpec::once);
    let timeout = descriptor
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| ctx.request_timeout());

    let is_graphql = descriptor.method == SourceMethod::Graphql;
    let verb = descriptor.method.http_verb().unwrap_or("GET");
    let mut request = request::descriptor_request(descriptor, verb)?;
    if is_graphql {
        let document = descriptor
            .graphql_document()
            .ok_or_else(|| RuntimeError::validation(format!("data source '{}' has no GraphQL document", descriptor.id)))?;
        request = request.json(graphql_payload(document, descriptor.variables.as_ref(), None));
    }
    debug!(data_source_id = %descriptor.id, method = %request.method, url = %request.url, "fetching data source");

    let transport = ctx.transport();
    let response = RetryCoordinator::run(|| request::send(transport, request.clone(), timeout), &retry, token).await?;
    let data = request::response_data(&response);
    if is_graphql { graphql_data(data) } else { Ok(data) }
}

/// Maps `raw`, stores it and clears the descriptor's error key.
fn publish(ctx: &RuntimeContext, descriptor: &DataSource, raw: Value) -> Value {
    let schema = ctx.schema();
    let value = apply_data_mappings(&descriptor.id, raw, schema.mappings_for(&descriptor.id), ctx.state());
    ctx.results().insert(&descriptor.id, value.clone());
    if let Some(error_key) = &descriptor.error_key {
        ctx.state().set(error_key, Value::Null);
    }
    value
}

fn store_error(ctx: &RuntimeContext, id: &str, error_key: Option<&str>, error: &RuntimeError) {
    warn!(data_source_id = id, status = ?error.status(), %error, "data source failed");
    let structured = error.to_structured();
    ctx.results().insert(id, structured.clone());
    if let Some(error_key) = error_key {
        ctx.state().set(error_key, structured);
    }
}

/// `errorKey` as declared, following `ref`, without resolving bindings.
fn declared_error_key(ctx: &RuntimeContext, id: &str) -> Option<String> {
    let schema = ctx.schema();
    let local = schema.data_source(id)?;
    local.error_key.clone().or_else(|| {
        local
            .reference
            .as_deref()
            .and_then(|reference| schema.global.data_source(reference))
            .and_then(|base| base.error_key.clone())
    })
}

/// Connection details produced by the optional setup call.
struct SocketTarget {
    url: String,
    protocol: SocketProtocol,
    connection_params: Option<Value>,
}

async fn socket_target(ctx: &RuntimeContext, descriptor: &DataSource, token: &CancellationToken) -> Result<SocketTarget, RuntimeError> {
    let socket = descriptor.socket.clone().unwrap_or_default();
    let mut raw_url = socket
        .url
        .clone()
        .unwrap_or_else(|| join_url(&descriptor.base_url, &descriptor.path));
    let mut connection_params = socket.connection_params.clone();

    if let Some(setup_path) = &socket.setup_path {
        let mut request = request::descriptor_request(descriptor, "POST")?;
        request.url = join_url(&descriptor.base_url, setup_path);
        request.query.clear();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RuntimeError::Cancelled),
            response = request::send(ctx.transport(), request, ctx.request_timeout()) => response?,
        };
        let setup = request::response_data(&response);
        debug!(data_source_id = %descriptor.id, "socket setup call completed");
        if let Value::Object(mut fields) = setup {
            if let Some(Value::String(url)) = fields.remove("url") {
                raw_url = url;
            }
            let params = connection_params.get_or_insert_with(|| Value::Object(Map::new()));
            deep_merge(params, &Value::Object(fields));
        }
    }

    let url = to_socket_url(&raw_url)
        .ok_or_else(|| RuntimeError::validation(format!("data source '{}' has no socket URL ('{raw_url}')", descriptor.id)))?;
    Ok(SocketTarget {
        url,
        protocol: descriptor.socket_protocol(),
        connection_params,
    })
}

async fn run_socket(ctx: Arc<RuntimeContext>, id: String, token: CancellationToken) {
    let base = Duration::from_millis(ctx.config().reconnect_base_ms);
    let ceiling = Duration::from_millis(ctx.config().reconnect_max_ms).max(base);
    let mut backoff = base;

    loop {
        if token.is_cancelled() {
            break;
        }
        match socket_session(&ctx, &id, &token, &mut backoff, base).await {
            Ok(StreamEnd::Closed { clean: false }) => warn!(data_source_id = %id, "socket closed uncleanly"),
            Ok(end) => {
                info!(data_source_id = %id, ?end, "socket finished");
                break;
            }
            Err(error) if error.is_cancelled() => break,
            Err(error) if error.is_retryable() => {
                store_error(&ctx, &id, declared_error_key(&ctx, &id).as_deref(), &error);
            }
            Err(error) => {
                store_error(&ctx, &id, declared_error_key(&ctx, &id).as_deref(), &error);
                break;
            }
        }

        info!(data_source_id = %id, delay_ms = backoff.as_millis() as u64, "reconnecting socket");
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(ceiling);
    }
}

/// One connection: connect, handshake, stream until the socket ends.
///
/// Raw sockets reset the backoff as soon as they open; subscription sockets
/// only once the server acknowledges the connection.
async fn socket_session(
    ctx: &RuntimeContext,
    id: &str,
    token: &CancellationToken,
    backoff: &mut Duration,
    base: Duration,
) -> Result<StreamEnd, RuntimeError> {
    let descriptor = ctx.resolve_descriptor(id, None)?;
    let target = socket_target(ctx, &descriptor, token).await?;
    let mut channel = stream::connect(ctx.connector(), &target.url, target.protocol, token).await?;

    if target.protocol.is_graphql() {
        stream::handshake(&mut channel, target.connection_params.as_ref(), ctx.ack_timeout(), token).await?;
        *backoff = base;
        let document = descriptor
            .graphql_document()
            .ok_or_else(|| RuntimeError::validation(format!("data source '{id}' has no subscription document")))?;
        let payload = graphql_payload(document, descriptor.variables.as_ref(), None);
        channel.send_json(&stream::subscribe_frame(target.protocol, id, payload));
        info!(data_source_id = id, url = %target.url, "subscription started");

        let error_key = descriptor.error_key.clone();
        Ok(stream::pump(&mut channel, descriptor.heartbeat.as_ref(), token, |text| match decode_subscription_frame(text) {
            SubscriptionFrame::Data(value) => {
                publish(ctx, &descriptor, value);
                FrameAction::Continue
            }
            SubscriptionFrame::Error(message) => {
                store_error(ctx, id, error_key.as_deref(), &RuntimeError::Graphql(message));
                FrameAction::Continue
            }
            SubscriptionFrame::Complete => FrameAction::Stop,
            SubscriptionFrame::Ping(_) => FrameAction::Reply(json!({ "type": "pong" })),
            SubscriptionFrame::KeepAlive | SubscriptionFrame::Other => FrameAction::Continue,
        })
        .await)
    } else {
        *backoff = base;
        if let Some(message) = descriptor.socket.as_ref().and_then(|socket| socket.message.as_ref()) {
            channel.send_text(frame_text(message));
        }
        info!(data_source_id = id, url = %target.url, "socket opened");
        Ok(stream::pump(&mut channel, descriptor.heartbeat.as_ref(), token, |text| {
            publish(ctx, &descriptor, decode_raw_frame(text));
            FrameAction::Continue
        })
        .await)
    }
}
