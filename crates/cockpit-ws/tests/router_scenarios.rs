// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process end-to-end tests for the six literal scenarios of spec.md
//! §8, exercising the real [`router`] actor against a [`MockTransport`]
//! rather than a real bridge subprocess — the "axum-test... for in-process
//! router tests that don't need a real subprocess" tier described in
//! SPEC_FULL.md §2's test tooling section. The process-backed transport
//! itself is covered separately by `transport::process`'s own
//! `#[cfg(test)]` suite.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use cockpit_ws::channel_response::{self, ResourceRequest};
use cockpit_ws::config::CockpitConfig;
use cockpit_ws::credentials::Credentials;
use cockpit_ws::error::Problem;
use cockpit_ws::frame::{build_control, parse_command, parse_frame};
use cockpit_ws::router::socket::ToClient;
use cockpit_ws::router::{self, RouterEvent};
use cockpit_ws::transport::{Pressure, Transport, TransportEvent};

/// Records every frame sent to the "bridge" and the problem it was closed
/// with, so tests can assert on what the router would have written to a
/// real subprocess's stdin.
#[derive(Clone, Default)]
struct MockTransport {
    sent: Arc<Mutex<VecDeque<(Option<String>, Bytes)>>>,
    closed_with: Arc<Mutex<Option<Option<Problem>>>>,
}

impl MockTransport {
    fn pop_control(&self) -> Option<(String, Option<String>, Map<String, Value>)> {
        loop {
            let (channel, payload) = self.sent.lock().pop_front()?;
            if channel.is_some() {
                continue;
            }
            let cmd = parse_command(&payload).expect("bridge-bound control frame must parse");
            return Some((cmd.command, cmd.channel, cmd.options));
        }
    }

    fn is_closed(&self) -> Option<Option<Problem>> {
        *self.closed_with.lock()
    }
}

impl Transport for MockTransport {
    fn send(&self, channel: Option<&str>, payload: Bytes) {
        self.sent.lock().push_back((channel.map(str::to_owned), payload));
    }

    fn close(&self, problem: Option<Problem>) {
        *self.closed_with.lock() = Some(problem);
    }

    fn pressure(&self) -> Pressure {
        Pressure::Normal
    }
}

struct Harness {
    handle: router::WebServiceHandle,
    transport: MockTransport,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    router_events: mpsc::UnboundedReceiver<RouterEvent>,
}

fn spawn_harness(credentials: Credentials) -> Harness {
    let config = Arc::new(CockpitConfig::for_tests());
    let transport = MockTransport::default();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (handle, router_events) =
        router::spawn(config, Arc::new(credentials), Box::new(transport.clone()), events_rx);
    Harness { handle, transport, events_tx, router_events }
}

fn send_bridge_control(harness: &Harness, fields: Vec<(&str, Value)>) {
    let command = fields.iter().find(|(k, _)| *k == "command").map(|(_, v)| v.as_str().unwrap().to_owned()).unwrap();
    let channel = fields.iter().find(|(k, _)| *k == "channel").and_then(|(_, v)| v.as_str()).map(str::to_owned);
    let mut options = Map::new();
    for (k, v) in &fields {
        options.insert((*k).to_owned(), v.clone());
    }
    // `raw` is the payload a real transport would hand the router: just the
    // JSON object, with no frame-level channel prefix (that belongs only to
    // the wire encoding `build_control` produces for an actual send).
    let raw = Bytes::from(Value::Object(options.clone()).to_string());
    harness
        .events_tx
        .send(TransportEvent::Control { command, channel, options, raw })
        .expect("router task still running");
}

async fn bridge_init_v1(harness: &Harness) {
    send_bridge_control(harness, vec![("command", json!("init")), ("version", json!(1))]);
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Scenario 1 (spec.md §8): handshake success, then ping/pong.
#[tokio::test]
async fn scenario_handshake_success_and_ping() {
    let harness = spawn_harness(Credentials::new("alice", b"hunter2".to_vec(), "", "tok-123", None));
    bridge_init_v1(&harness).await;
    harness.transport.pop_control(); // drain the router's own init reply to the bridge

    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel();
    let init_frame = harness.handle.socket_open("sock1".to_owned(), to_client_tx).await.unwrap();
    let (channel, payload) = parse_frame(&init_frame).unwrap();
    assert_eq!(channel, None);
    let cmd = parse_command(payload).unwrap();
    assert_eq!(cmd.command, "init");
    assert_eq!(cmd.options.get("version"), Some(&json!(1)));
    assert_eq!(cmd.options.get("host"), Some(&json!("localhost")));
    assert_eq!(cmd.options.get("csrf-token"), Some(&json!("tok-123")));
    assert_eq!(cmd.options.get("capabilities"), Some(&json!(["multi", "credentials", "binary"])));
    assert!(cmd.options.get("channel-seed").and_then(Value::as_str).is_some());

    // Client completes its own handshake.
    harness.handle.socket_frame(
        "sock1".to_owned(),
        Bytes::from(build_control([("command", json!("init")), ("version", json!(1))])),
    );

    // Client pings; router answers locally without forwarding to the bridge.
    harness
        .handle
        .socket_frame("sock1".to_owned(), Bytes::from(build_control([("command", json!("ping"))])));

    let reply = to_client_rx.recv().await.unwrap();
    let ToClient::Text(bytes) = reply else { panic!("expected text reply") };
    let (channel, payload) = parse_frame(&bytes).unwrap();
    assert_eq!(channel, None);
    assert_eq!(parse_command(payload).unwrap().command, "pong");

    assert!(harness.transport.pop_control().is_none(), "ping must not be forwarded to the bridge");
}

/// Scenario 2 (spec.md §8): channel open, bridge echo, then close.
#[tokio::test]
async fn scenario_channel_open_and_echo() {
    let harness = spawn_harness(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    bridge_init_v1(&harness).await;
    harness.transport.pop_control(); // drain the router's own init reply to the bridge

    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel();
    harness.handle.socket_open("sock1".to_owned(), to_client_tx).await.unwrap();
    harness.handle.socket_frame(
        "sock1".to_owned(),
        Bytes::from(build_control([("command", json!("init")), ("version", json!(1))])),
    );

    // A frame for a channel that does not exist yet is dropped.
    harness.handle.socket_frame("sock1".to_owned(), Bytes::from(b"a\nhello".to_vec()));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(harness.transport.pop_control().is_none());

    harness.handle.socket_frame(
        "sock1".to_owned(),
        Bytes::from(build_control([
            ("command", json!("open")),
            ("channel", json!("a")),
            ("payload", json!("echo")),
        ])),
    );
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (command, channel, _) = harness.transport.pop_control().unwrap();
    assert_eq!(command, "open");
    assert_eq!(channel.as_deref(), Some("a"));

    // Bridge answers `ready` then an echoed data frame.
    send_bridge_control(&harness, vec![("command", json!("ready")), ("channel", json!("a"))]);
    harness
        .events_tx
        .send(TransportEvent::Recv { channel: "a".to_owned(), payload: Bytes::from_static(b"hello") })
        .unwrap();

    let ready = to_client_rx.recv().await.unwrap();
    let ToClient::Text(bytes) = ready else { panic!("expected text") };
    let (channel, payload) = parse_frame(&bytes).unwrap();
    assert_eq!(channel, None);
    assert_eq!(parse_command(payload).unwrap().command, "ready");

    let echoed = to_client_rx.recv().await.unwrap();
    let ToClient::Text(bytes) = echoed else { panic!("expected text") };
    let (channel, payload) = parse_frame(&bytes).unwrap();
    assert_eq!(channel.as_deref(), Some("a"));
    assert_eq!(payload, b"hello");

    // Client closes; router forwards, bridge acks, router forwards that too.
    harness
        .handle
        .socket_frame("sock1".to_owned(), Bytes::from(build_control([("command", json!("close")), ("channel", json!("a"))])));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (command, channel, _) = harness.transport.pop_control().unwrap();
    assert_eq!(command, "close");
    assert_eq!(channel.as_deref(), Some("a"));

    send_bridge_control(&harness, vec![("command", json!("close")), ("channel", json!("a"))]);
    let closed = to_client_rx.recv().await.unwrap();
    let ToClient::Text(bytes) = closed else { panic!("expected text") };
    let (channel, payload) = parse_frame(&bytes).unwrap();
    assert_eq!(channel, None);
    assert_eq!(parse_command(payload).unwrap().command, "close");
}

/// Scenario 3 (spec.md §8): client logout poisons credentials and disposes.
#[tokio::test]
async fn scenario_logout_disposes_router() {
    let creds = Arc::new(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    let config = Arc::new(CockpitConfig::for_tests());
    let transport = MockTransport::default();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (handle, mut router_events) =
        router::spawn(config, Arc::clone(&creds), Box::new(transport.clone()), events_rx);
    let _events_tx = events_tx;

    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel();
    handle.socket_open("sock1".to_owned(), to_client_tx).await.unwrap();
    handle.socket_frame("sock1".to_owned(), Bytes::from(build_control([("command", json!("init")), ("version", json!(1))])));

    handle.socket_frame("sock1".to_owned(), Bytes::from(build_control([("command", json!("logout"))])));

    let close_msg = to_client_rx.recv().await.unwrap();
    let ToClient::Text(bytes) = close_msg else { panic!("expected text") };
    let (channel, payload) = parse_frame(&bytes).unwrap();
    assert_eq!(channel, None);
    let cmd = parse_command(payload).unwrap();
    assert_eq!(cmd.command, "close");
    assert_eq!(cmd.options.get("problem"), Some(&json!("terminated")));

    assert!(matches!(to_client_rx.recv().await, Some(ToClient::Close { .. })));
    assert!(creds.is_poisoned());

    let event = tokio::time::timeout(Duration::from_millis(200), router_events.recv()).await.unwrap();
    assert!(matches!(event, Some(RouterEvent::Disposed)));
}

/// Scenario 4 (spec.md §8): bridge version mismatch closes with
/// `not-supported` and disposes the router.
#[tokio::test]
async fn scenario_bridge_version_mismatch() {
    let harness = spawn_harness(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    send_bridge_control(&harness, vec![("command", json!("init")), ("version", json!(2))]);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.transport.is_closed(), Some(Some(Problem::NotSupported)));
}

/// Scenario 6 (spec.md §8): a bridge `authorize` "basic" challenge is
/// answered with `Basic base64(user:password)`.
#[tokio::test]
async fn scenario_authorize_basic_challenge() {
    let harness = spawn_harness(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    bridge_init_v1(&harness).await;
    harness.transport.pop_control(); // drain the router's own init reply

    let subject_hex: String = "alice".bytes().map(|b| format!("{b:02x}")).collect();
    send_bridge_control(
        &harness,
        vec![
            ("command", json!("authorize")),
            ("challenge", json!(format!("basic:{subject_hex}"))),
            ("cookie", json!("c1")),
        ],
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (command, _, options) = harness.transport.pop_control().unwrap();
    assert_eq!(command, "authorize");
    assert_eq!(options.get("cookie"), Some(&json!("c1")));
    let response = options.get("response").and_then(Value::as_str).unwrap();
    assert_eq!(response, "Basic YWxpY2U6aHVudGVyMg==");
}

/// Scenario 5 (spec.md §8): a resource fetch carrying a `CockpitLang` cookie
/// is forwarded to the bridge as an `accept-language` preference, and the
/// response carries `Vary: Cookie` plus the base security headers.
#[tokio::test]
async fn scenario_cookie_language_override_for_resource() {
    let harness = spawn_harness(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    bridge_init_v1(&harness).await;
    harness.transport.pop_control(); // drain the router's own init reply

    let req = ResourceRequest {
        method: axum::http::Method::GET,
        host: "@localhost".to_owned(),
        path: "/another/test.html".to_owned(),
        accept_language: Vec::new(),
        cookie_language: Some("pig".to_owned()),
        if_none_match: None,
        origin: None,
        base_csp: None,
    };

    let handle = harness.handle.clone();
    let serving = tokio::spawn(async move { channel_response::serve(&handle, req).await });

    // Wait for the router to open the external channel on the "bridge".
    let (command, channel, options) = loop {
        if let Some(hit) = harness.transport.pop_control() {
            break hit;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(command, "open");
    assert_eq!(options.get("accept-language"), Some(&json!(["pig"])));
    let channel = channel.expect("open carries the allocated channel id");

    send_bridge_control(
        &harness,
        vec![
            ("command", json!("response")),
            ("channel", json!(channel)),
            ("status", json!(200)),
            ("headers", json!({"content-type": "text/html"})),
        ],
    );
    harness
        .events_tx
        .send(TransportEvent::Recv { channel: channel.clone(), payload: Bytes::from_static(b"Inlay omehay irday") })
        .unwrap();
    send_bridge_control(&harness, vec![("command", json!("close")), ("channel", json!(channel))]);

    let response = serving.await.unwrap();
    assert_eq!(response.headers().get("vary").unwrap(), "Cookie");
    assert!(response.headers().contains_key("x-content-type-options"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Inlay omehay irday");
}

/// Open question #2 (spec.md §9): whichever of the legacy poison timer or
/// an explicit `superuser-init-done` fires first wins. Here the bridge
/// declares no superuser support, arming the legacy 120s timer; an
/// explicit `superuser-init-done` must still poison immediately rather
/// than waiting for it.
#[tokio::test]
async fn superuser_init_done_poisons_immediately_without_waiting_for_legacy_timer() {
    let creds = Arc::new(Credentials::new("alice", b"hunter2".to_vec(), "", "", None));
    let config = Arc::new(CockpitConfig::for_tests());
    let transport = MockTransport::default();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (_handle, _router_events) =
        router::spawn(config, Arc::clone(&creds), Box::new(transport.clone()), events_rx);

    events_tx
        .send(TransportEvent::Control {
            command: "init".to_owned(),
            channel: None,
            options: {
                let mut m = Map::new();
                m.insert("command".to_owned(), json!("init"));
                m.insert("version".to_owned(), json!(1));
                m
            },
            raw: Bytes::new(),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!creds.is_poisoned());

    events_tx
        .send(TransportEvent::Control {
            command: "superuser-init-done".to_owned(),
            channel: None,
            options: Map::new(),
            raw: Bytes::new(),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(creds.is_poisoned());
}
