mod common;

use std::time::Duration;

use common::{FakeConnector, FakeTransport, RecordingRuntime, context, schema, settle};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tessera_api::{ApiError, HttpResponse, RequestBody, SocketEvent, SocketFrame};
use tessera_engine::{ActionExecutor, ActionOutcome, Environment, RuntimeContext};

const ITEMS: &str = r#"
dataSources:
  - id: items
    baseUrl: "https://api.x/"
    path: items
    method: GET
handlers:
  load:
    action: crud_read
    dataSourceId: items
    responseType: data
    statePath: items
  load_with_retry:
    action: crud_read
    dataSourceId: items
    statePath: items
    retry: { attempts: 2, delay: 50, strategy: linear }
    errorAction:
      action: update_state
      params: { key: failed, value: true }
"#;

#[tokio::test]
async fn crud_read_writes_data_to_state_path() {
    let transport = FakeTransport::fixed(200, json!([{ "id": 1 }]));
    let runtime = RecordingRuntime::new();
    let ctx = context(schema(ITEMS), transport.clone(), FakeConnector::new(), runtime.clone());
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("load", None).await;

    assert_eq!(outcome, ActionOutcome::Succeeded(json!([{ "id": 1 }])));
    assert_eq!(ctx.state().get("items"), Some(json!([{ "id": 1 }])));
    assert_eq!(transport.urls(), vec!["https://api.x/items".to_string()]);
    assert!(runtime.calls().is_empty(), "no continuation or notification expected: {:?}", runtime.calls());
}

#[tokio::test(start_paused = true)]
async fn server_errors_are_retried_then_routed_to_error_action() {
    let transport = FakeTransport::fixed(500, json!({ "message": "boom" }));
    let runtime = RecordingRuntime::new();
    let ctx = context(schema(ITEMS), transport.clone(), FakeConnector::new(), runtime.clone());
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("load_with_retry", None).await;

    let ActionOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.contains("500"), "{message}");

    let requests = transport.requests.lock();
    assert_eq!(requests.len(), 2);
    let gap = requests[1].0 - requests[0].0;
    assert!(gap >= Duration::from_millis(50) && gap < Duration::from_millis(60), "gap was {gap:?}");
    drop(requests);

    assert_eq!(ctx.state().get("failed"), Some(json!(true)));
    assert_eq!(ctx.state().get("items"), None);
    let notifications = runtime.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].starts_with("notify:Error:") && notifications[0].contains("500"), "{notifications:?}");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let transport = FakeTransport::fixed(404, json!({ "error": { "message": "no such item" } }));
    let runtime = RecordingRuntime::new();
    let ctx = context(schema(ITEMS), transport.clone(), FakeConnector::new(), runtime.clone());
    let executor = ActionExecutor::new(ctx);

    let outcome = executor.execute_named("load_with_retry", None).await;

    assert_eq!(outcome, ActionOutcome::Failed("HTTP 404: no such item".into()));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn optimistic_patch_is_reverted_on_failure() {
    let transport = FakeTransport::fixed(422, json!({ "message": "invalid" }));
    let runtime = RecordingRuntime::new();
    let ctx = RuntimeContext::builder(schema(
        r#"
handlers:
  toggle:
    action: crud_update
    url: "https://api.x/todos/{{todo.id}}"
    body: { done: true }
    optimistic: { path: todo.done, value: true }
"#,
    ))
    .transport(transport.clone())
    .connector(FakeConnector::new())
    .action_runtime(runtime)
    .environment(Environment::default())
    .initial_state(json!({ "todo": { "id": 7, "done": false } }))
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("toggle", None).await;

    assert!(matches!(outcome, ActionOutcome::Failed(_)));
    assert_eq!(ctx.state().get("todo.done"), Some(json!(false)));
    let requests = transport.requests.lock();
    assert_eq!(requests[0].1.url, "https://api.x/todos/7");
    assert_eq!(requests[0].1.method.as_str(), "PUT");
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_in_flight_request_and_reverts() {
    let transport = FakeTransport::with_latency(|_| Duration::from_secs(10), |_, _| Ok(HttpResponse::json(200, &json!({ "ok": true }))));
    let runtime = RecordingRuntime::new();
    let ctx = RuntimeContext::builder(schema(
        r#"
handlers:
  save:
    action: crud_create
    url: "https://api.x/notes"
    statePath: saved
    optimistic: { path: saving, value: true }
    successAction:
      action: navigate
      params: { href: /notes }
"#,
    ))
    .transport(transport.clone())
    .connector(FakeConnector::new())
    .action_runtime(runtime.clone())
    .environment(Environment::default())
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx.clone());

    let (outcome, cancelled) = tokio::join!(executor.execute_named("save", None), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        executor.teardown()
    });

    assert_eq!(outcome, ActionOutcome::Cancelled);
    assert_eq!(cancelled, 1);
    assert_eq!(ctx.state().get("saving"), None);
    assert_eq!(ctx.state().get("saved"), None);
    assert!(runtime.calls().is_empty(), "{:?}", runtime.calls());
    assert_eq!(ctx.invocations().active(), 0);
}

#[tokio::test]
async fn success_runs_transition_then_continuation() {
    let transport = FakeTransport::new(|request, _| {
        let RequestBody::Json(body) = &request.body else {
            return Err(ApiError::InvalidRequest("expected a JSON body".into()));
        };
        Ok(HttpResponse::json(201, &json!({ "id": 42, "name": body["name"] })))
    });
    let runtime = RecordingRuntime::new();
    let ctx = RuntimeContext::builder(schema(
        r#"
handlers:
  create:
    action: crud_create
    url: "https://api.x/people"
    body: { name: "{{form.name}}" }
    statePath: created
    resultMapping: { path: id }
    successTransition:
      href: /people
      modal: { closeId: editor, openId: confirm }
      statePatches:
        - { key: form.dirty, value: false }
    successAction:
      action: update_state
      params: { key: lastSaved, value: "{{form.name}}" }
"#,
    ))
    .transport(transport.clone())
    .connector(FakeConnector::new())
    .action_runtime(runtime.clone())
    .environment(Environment::default())
    .initial_state(json!({ "form": { "name": "Ada", "dirty": true } }))
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("create", None).await;

    assert_eq!(outcome, ActionOutcome::Succeeded(json!(42)));
    assert_eq!(ctx.state().get("created"), Some(json!(42)));
    assert_eq!(ctx.state().get("form.dirty"), Some(json!(false)));
    assert_eq!(ctx.state().get("lastSaved"), Some(json!("Ada")));
    assert_eq!(runtime.calls(), vec!["navigate:/people:false", "close_modal:editor", "open_modal:confirm"]);

    let requests = transport.requests.lock();
    assert_eq!(requests[0].1.method.as_str(), "POST");
    assert!(matches!(&requests[0].1.body, RequestBody::Json(body) if body == &json!({ "name": "Ada" })));
}

#[tokio::test]
async fn triggering_data_is_visible_to_bindings() {
    let transport = FakeTransport::fixed(200, json!({ "deleted": true }));
    let ctx = context(
        schema(
            r#"
handlers:
  remove:
    action: crud_delete
    url: "https://api.x/rows/{{row.id}}"
    statePath: "deleted_{{row.id}}"
"#,
        ),
        transport.clone(),
        FakeConnector::new(),
        RecordingRuntime::new(),
    );
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("remove", Some(json!({ "row": { "id": 9 } }))).await;

    assert!(outcome.is_success());
    assert_eq!(transport.urls(), vec!["https://api.x/rows/9".to_string()]);
    assert_eq!(ctx.state().get("deleted_9"), Some(json!({ "deleted": true })));
}

#[tokio::test]
async fn unknown_handler_and_disallowed_script_fail() {
    let runtime = RecordingRuntime::new();
    let ctx = context(
        schema(
            r#"
runtime:
  allowedScripts: [recalc]
handlers:
  rogue:
    action: run_script
    params: { name: wipe }
  recalc:
    action: run_script
    params: { name: recalc, args: [1, 2] }
    statePath: recalculated
"#,
        ),
        FakeTransport::fixed(200, Value::Null),
        FakeConnector::new(),
        runtime.clone(),
    );
    let executor = ActionExecutor::new(ctx.clone());

    assert!(matches!(executor.execute_named("missing", None).await, ActionOutcome::Failed(message) if message.contains("missing")));
    assert!(matches!(executor.execute_named("rogue", None).await, ActionOutcome::Failed(message) if message.contains("not allowed")));
    assert!(executor.execute_named("recalc", None).await.is_success());
    assert_eq!(ctx.state().get("recalculated"), Some(json!({ "script": "recalc", "args": [1, 2] })));
    assert!(!runtime.calls().contains(&"run_script:wipe".to_string()));
}

#[tokio::test]
async fn capability_failures_reach_error_action() {
    let runtime = RecordingRuntime::new();
    let ctx = context(
        schema(
            r#"
handlers:
  connect:
    action: wallet_connect
    errorTransition:
      statePatches:
        - { key: wallet.status, value: unavailable }
"#,
        ),
        FakeTransport::fixed(200, Value::Null),
        FakeConnector::new(),
        runtime.clone(),
    );
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("connect", None).await;

    assert!(matches!(&outcome, ActionOutcome::Failed(message) if message.contains("wallet_connect") && message.contains("no wallet")));
    assert_eq!(ctx.state().get("wallet.status"), Some(json!("unavailable")));
}

#[tokio::test]
async fn export_hands_csv_to_runtime() {
    let runtime = RecordingRuntime::new();
    let ctx = RuntimeContext::builder(schema(
        r#"
handlers:
  export:
    action: export_file
    params: { format: csv, filename: people.csv, data: "{{people}}" }
"#,
    ))
    .transport(FakeTransport::fixed(200, Value::Null))
    .connector(FakeConnector::new())
    .action_runtime(runtime.clone())
    .environment(Environment::default())
    .initial_state(json!({ "people": [{ "name": "Ada" }, { "name": "Grace" }] }))
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx);

    let outcome = executor.execute_named("export", None).await;

    assert_eq!(outcome, ActionOutcome::Succeeded(json!({ "filename": "people.csv", "size": 15 })));
    let exports = runtime.exports.lock();
    assert_eq!(exports[0].0, "people.csv");
    assert_eq!(exports[0].1, "text/csv");
    assert_eq!(exports[0].2.as_ref(), b"name\nAda\nGrace\n");
}

#[tokio::test]
async fn graphql_subscription_streams_into_state() {
    let connector = FakeConnector::new();
    let ctx = context(
        schema(
            r#"
handlers:
  watch:
    action: graphql_subscription
    url: "https://api.x/graphql"
    params:
      subscription: "subscription { tick { n } }"
    statePath: tick
"#,
        ),
        FakeTransport::fixed(200, Value::Null),
        connector.clone(),
        RecordingRuntime::new(),
    );
    let executor = ActionExecutor::new(ctx.clone());

    let server = async {
        let mut peer = connector.next_peer().await;
        let Some(SocketFrame::Text(init)) = peer.frames.recv().await else {
            panic!("expected connection_init");
        };
        assert_eq!(serde_json::from_str::<Value>(&init).unwrap()["type"], "connection_init");
        peer.events.send(SocketEvent::Message(json!({ "type": "connection_ack" }).to_string())).unwrap();
        let Some(SocketFrame::Text(subscribe)) = peer.frames.recv().await else {
            panic!("expected subscribe");
        };
        let subscribe: Value = serde_json::from_str(&subscribe).unwrap();
        assert_eq!(subscribe["type"], "subscribe");
        assert_eq!(subscribe["id"], "1");
        assert_eq!(subscribe["payload"]["query"], "subscription { tick { n } }");
        peer
    };
    let (outcome, mut peer) = tokio::join!(executor.execute_named("watch", None), server);
    assert!(outcome.is_success());

    let (url, subprotocol) = connector.connections.lock()[0].clone();
    assert_eq!(url, "wss://api.x/graphql");
    assert_eq!(subprotocol.as_deref(), Some("graphql-transport-ws"));

    assert_eq!(ctx.invocations().active(), 1);
    let id = 1;
    peer.events
        .send(SocketEvent::Message(json!({ "id": id.to_string(), "type": "next", "payload": { "data": { "tick": { "n": 1 } } } }).to_string()))
        .unwrap();
    settle().await;
    assert_eq!(ctx.state().get("tick"), Some(json!({ "tick": { "n": 1 } })));

    assert!(executor.cancel(id));
    assert_eq!(peer.frames.recv().await, Some(SocketFrame::Close));
    settle().await;
    assert_eq!(ctx.invocations().active(), 0);
}

#[tokio::test]
async fn websocket_call_can_await_a_reply() {
    let connector = FakeConnector::new();
    let ctx = context(
        schema(
            r#"
handlers:
  ping:
    action: websocket_call
    url: "http://echo.x/socket"
    params:
      message: { op: ping }
      awaitReply: true
    statePath: reply
"#,
        ),
        FakeTransport::fixed(200, Value::Null),
        connector.clone(),
        RecordingRuntime::new(),
    );
    let executor = ActionExecutor::new(ctx.clone());

    let server = async {
        let mut peer = connector.next_peer().await;
        let Some(SocketFrame::Text(message)) = peer.frames.recv().await else {
            panic!("expected the outgoing message");
        };
        assert_eq!(serde_json::from_str::<Value>(&message).unwrap(), json!({ "op": "ping" }));
        peer.events.send(SocketEvent::Message(r#"{"op":"pong"}"#.into())).unwrap();
        peer
    };
    let (outcome, _peer) = tokio::join!(executor.execute_named("ping", None), server);

    assert_eq!(outcome, ActionOutcome::Succeeded(json!({ "op": "pong" })));
    assert_eq!(ctx.state().get("reply"), Some(json!({ "op": "pong" })));
    assert_eq!(connector.connections.lock()[0].0, "ws://echo.x/socket");
}

#[tokio::test]
async fn failing_result_transform_takes_the_error_path() {
    let transport = FakeTransport::fixed(200, json!([{ "id": 1 }]));
    let runtime = RecordingRuntime::new();
    let ctx = RuntimeContext::builder(schema(
        r#"
dataSources:
  - id: items
    baseUrl: "https://api.x/"
    path: items
handlers:
  load:
    action: crud_read
    dataSourceId: items
    statePath: items
    optimistic: { path: loading, value: true }
    resultMapping: { transform: "data +" }
    successTransition: { href: /done }
    errorAction:
      action: update_state
      params: { key: failed, value: true }
"#,
    ))
    .transport(transport)
    .connector(FakeConnector::new())
    .action_runtime(runtime.clone())
    .environment(Environment::default())
    .initial_state(json!({ "loading": false }))
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx.clone());

    let outcome = executor.execute_named("load", None).await;

    let ActionOutcome::Failed(message) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(message.starts_with("Mapping error"), "{message}");
    assert_eq!(ctx.state().get("items"), None);
    assert_eq!(ctx.state().get("loading"), Some(json!(false)));
    assert_eq!(ctx.state().get("failed"), Some(json!(true)));
    let calls = runtime.calls();
    assert!(!calls.iter().any(|call| call.starts_with("navigate:")), "{calls:?}");
    assert_eq!(runtime.notifications().len(), 1);
}

#[tokio::test]
async fn success_clears_the_descriptor_error_key() {
    let transport = FakeTransport::fixed(200, json!({ "ok": true }));
    let ctx = RuntimeContext::builder(schema(
        r#"
dataSources:
  - id: items
    baseUrl: "https://api.x/"
    path: items
    errorKey: errors.items
handlers:
  load:
    action: crud_read
    dataSourceId: items
"#,
    ))
    .transport(transport)
    .connector(FakeConnector::new())
    .action_runtime(RecordingRuntime::new())
    .environment(Environment::default())
    .initial_state(json!({ "errors": { "items": { "ok": false, "error": "HTTP 503" } } }))
    .build()
    .unwrap();
    let executor = ActionExecutor::new(ctx.clone());

    assert!(executor.execute_named("load", None).await.is_success());
    assert_eq!(ctx.state().get("errors.items"), Some(Value::Null));
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_retry_backoff_stops_further_attempts() {
    let transport = FakeTransport::fixed(503, json!({ "message": "busy" }));
    let runtime = RecordingRuntime::new();
    let ctx = context(schema(ITEMS), transport.clone(), FakeConnector::new(), runtime.clone());
    let executor = ActionExecutor::new(ctx.clone());
    let handler = ctx.schema().handler("load_with_retry").cloned().unwrap();

    let id = executor.spawn(handler, None);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.call_count(), 1);
    assert!(executor.cancel(id));

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(transport.call_count(), 1);
    assert_eq!(ctx.state().get("failed"), None);
    assert!(runtime.calls().is_empty(), "{:?}", runtime.calls());
    assert_eq!(ctx.invocations().active(), 0);
}
