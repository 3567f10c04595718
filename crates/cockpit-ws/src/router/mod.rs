// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session router (`WebService`, §4.4): owns one bridge transport and
//! the sockets attached to it, runs the handshake state machines, and
//! relays frames between the two sides.

pub mod authorize;
pub mod socket;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Sleep};

use crate::config::CockpitConfig;
use crate::credentials::Credentials;
use crate::error::Problem;
use crate::frame::{build_control, build_control_payload, build_frame};
use crate::router::authorize::{build_response, parse_challenge, subject_matches};
use crate::router::socket::{Flavor, SocketState, ToClient, CLOSE_CODE_SERVER_ERROR};
use crate::transport::{Pressure, Transport, TransportEvent};

/// Events the router reports to an external supervisor (idle detection,
/// disposal). Consumed by whatever owns the per-session lifetime (the
/// HTTP layer in this crate).
#[derive(Debug)]
pub enum RouterEvent {
    Idling,
    Disposed,
}

/// Events an [`ExternalChannel`] (used by `ChannelResponse`) receives from
/// the router for the channel it opened.
#[derive(Debug)]
pub enum ExternalEvent {
    Control { command: String, options: Map<String, Value> },
    Recv(Bytes),
    Closed(Option<Problem>),
}

enum ChannelOwner {
    Socket(String),
    External(mpsc::UnboundedSender<ExternalEvent>),
}

struct ChannelEntry {
    owner: ChannelOwner,
    flavor: Flavor,
}

/// Commands sent into the router's single-owner event loop.
pub enum RouterCommand {
    SocketOpen { id: String, to_client: mpsc::UnboundedSender<ToClient>, reply: oneshot::Sender<SocketOpenAck> },
    SocketFrame { id: String, frame: Bytes },
    SocketClosed { id: String },
    OpenExternalChannel {
        owner: mpsc::UnboundedSender<ExternalEvent>,
        open_fields: Map<String, Value>,
        reply: oneshot::Sender<String>,
    },
    ExternalDone { channel: String },
    ExternalClose { channel: String },
}

/// What a newly-opened socket needs back from the router to complete its
/// own handshake: the per-socket `init` control frame body.
pub struct SocketOpenAck {
    pub init_frame: Bytes,
}

/// A cheap, cloneable handle to a running router.
#[derive(Clone)]
pub struct WebServiceHandle {
    cmd_tx: mpsc::UnboundedSender<RouterCommand>,
}

impl WebServiceHandle {
    pub async fn socket_open(&self, id: String, to_client: mpsc::UnboundedSender<ToClient>) -> Option<Bytes> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(RouterCommand::SocketOpen { id, to_client, reply }).ok()?;
        rx.await.ok().map(|ack| ack.init_frame)
    }

    pub fn socket_frame(&self, id: String, frame: Bytes) {
        let _ = self.cmd_tx.send(RouterCommand::SocketFrame { id, frame });
    }

    pub fn socket_closed(&self, id: String) {
        let _ = self.cmd_tx.send(RouterCommand::SocketClosed { id });
    }

    /// Open an internal channel on behalf of an external HTTP adapter
    /// (`ChannelResponse`), returning its allocated channel id.
    pub async fn open_external_channel(
        &self,
        open_fields: Map<String, Value>,
        owner: mpsc::UnboundedSender<ExternalEvent>,
    ) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(RouterCommand::OpenExternalChannel { owner, open_fields, reply }).ok()?;
        rx.await.ok()
    }

    pub fn external_done(&self, channel: String) {
        let _ = self.cmd_tx.send(RouterCommand::ExternalDone { channel });
    }

    pub fn external_close(&self, channel: String) {
        let _ = self.cmd_tx.send(RouterCommand::ExternalClose { channel });
    }
}

/// Spawn a router actor owning `transport`, draining `transport_events`,
/// and reporting lifecycle events on the returned receiver.
pub fn spawn(
    config: Arc<CockpitConfig>,
    credentials: Arc<Credentials>,
    transport: Box<dyn Transport>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
) -> (WebServiceHandle, mpsc::UnboundedReceiver<RouterEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (router_events_tx, router_events_rx) = mpsc::unbounded_channel();

    let actor = Actor {
        config,
        credentials,
        transport,
        sockets: HashMap::new(),
        channels: HashMap::new(),
        bridge_init_received: false,
        superuser_capable: false,
        next_channel_seq: 0,
        next_socket_seq: 0,
        live_sockets: Arc::new(AtomicUsize::new(0)),
        disposed: false,
        router_events: router_events_tx,
    };

    tokio::spawn(actor.run(cmd_rx, transport_events));

    (WebServiceHandle { cmd_tx }, router_events_rx)
}

struct Actor {
    config: Arc<CockpitConfig>,
    credentials: Arc<Credentials>,
    transport: Box<dyn Transport>,
    sockets: HashMap<String, SocketState>,
    channels: HashMap<String, ChannelEntry>,
    bridge_init_received: bool,
    superuser_capable: bool,
    next_channel_seq: u64,
    next_socket_seq: u64,
    live_sockets: Arc<AtomicUsize>,
    disposed: bool,
    router_events: mpsc::UnboundedSender<RouterEvent>,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<RouterCommand>, mut transport_events: mpsc::UnboundedReceiver<TransportEvent>) {
        let mut ping_timer = tokio::time::interval(self.config.ping_interval());
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut poison_sleep: std::pin::Pin<Box<Sleep>> = Box::pin(sleep(self.config.poison_delay()));
        let mut poison_armed = false;
        let mut idle_sleep: std::pin::Pin<Box<Sleep>> = Box::pin(sleep(self.config.idle_grace()));
        let mut idle_armed = false;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                event = transport_events.recv() => {
                    match event {
                        Some(event) => self.handle_transport_event(event, &mut poison_armed, &mut poison_sleep),
                        None => break,
                    }
                }
                _ = ping_timer.tick() => {
                    self.send_pings();
                }
                () = &mut poison_sleep, if poison_armed => {
                    tracing::debug!("legacy credential poison deadline elapsed");
                    self.credentials.poison();
                    poison_armed = false;
                }
                () = &mut idle_sleep, if idle_armed => {
                    tracing::debug!("idle grace period elapsed with no attached sockets");
                    self.dispose(None);
                }
            }

            if self.live_sockets.load(Ordering::Relaxed) == 0 && !idle_armed && !self.disposed {
                idle_sleep = Box::pin(sleep(self.config.idle_grace()));
                idle_armed = true;
                let _ = self.router_events.send(RouterEvent::Idling);
            } else if self.live_sockets.load(Ordering::Relaxed) > 0 {
                idle_armed = false;
            }

            if self.disposed {
                break;
            }
        }

        let _ = self.router_events.send(RouterEvent::Disposed);
    }

    fn handle_command(&mut self, cmd: RouterCommand) {
        match cmd {
            RouterCommand::SocketOpen { id, to_client, reply } => {
                let init_frame = self.socket_open(id, to_client);
                let _ = reply.send(SocketOpenAck { init_frame: Bytes::from(init_frame) });
            }
            RouterCommand::SocketFrame { id, frame } => self.socket_frame(&id, &frame),
            RouterCommand::SocketClosed { id } => self.socket_closed(&id),
            RouterCommand::OpenExternalChannel { owner, open_fields, reply } => {
                let channel = self.open_external_channel(owner, open_fields);
                let _ = reply.send(channel);
            }
            RouterCommand::ExternalDone { channel } => {
                self.transport.send(
                    None,
                    Bytes::from(build_control_payload([
                        ("command", json!("done")),
                        ("channel", json!(channel)),
                    ])),
                );
            }
            RouterCommand::ExternalClose { channel } => {
                self.close_channel_to_bridge(&channel, Some(Problem::Disconnected));
                self.channels.remove(&channel);
            }
        }
    }

    // -- Socket lifecycle ----------------------------------------------

    fn socket_open(&mut self, id: String, to_client: mpsc::UnboundedSender<ToClient>) -> Vec<u8> {
        self.next_socket_seq += 1;
        let channel_seed = format!("{}:", self.next_socket_seq);
        self.live_sockets.fetch_add(1, Ordering::Relaxed);
        self.sockets.insert(id.clone(), SocketState::new(channel_seed.clone(), to_client));

        build_control([
            ("command", json!("init")),
            ("version", json!(1)),
            ("channel-seed", json!(channel_seed)),
            ("host", json!("localhost")),
            ("csrf-token", json!(self.credentials.csrf_token())),
            ("capabilities", json!(["multi", "credentials", "binary"])),
            ("system", json!({"version": env!("CARGO_PKG_VERSION")})),
        ])
    }

    fn socket_closed(&mut self, id: &str) {
        let Some(socket) = self.sockets.remove(id) else { return };
        self.live_sockets.fetch_sub(1, Ordering::Relaxed);
        for channel in socket.channels {
            self.close_channel_to_bridge(&channel, Some(Problem::Disconnected));
            self.channels.remove(&channel);
        }
    }

    fn protocol_error_close_socket(&mut self, id: &str) {
        if let Some(socket) = self.sockets.get(id) {
            socket.send(ToClient::Text(Bytes::from(build_control([
                ("command", json!("close")),
                ("problem", json!(Problem::ProtocolError.as_str())),
            ]))));
            socket.send(ToClient::Close { code: CLOSE_CODE_SERVER_ERROR, reason: "protocol-error" });
        }
        self.socket_closed(id);
    }

    // -- Client -> bridge (§4.4.2) ---------------------------------------

    fn socket_frame(&mut self, id: &str, frame: &[u8]) {
        let (channel, payload) = match crate::frame::parse_frame(frame) {
            Ok(parsed) => parsed,
            Err(_) => return self.protocol_error_close_socket(id),
        };

        let Some(channel) = channel else {
            return self.socket_control(id, payload);
        };

        // First message on a socket must be its own `init`. Handled above
        // via the control branch when the frame has no channel; a
        // channel-bearing frame before handshake is itself a violation.
        if !self.sockets.get(id).map(|s| s.handshaked).unwrap_or(false) {
            return self.protocol_error_close_socket(id);
        }

        let owned_by_this_socket =
            matches!(self.channels.get(&channel), Some(entry) if matches!(&entry.owner, ChannelOwner::Socket(sid) if sid == id));
        if !owned_by_this_socket {
            tracing::debug!(channel = %channel, "dropping frame for unknown/foreign channel");
            return;
        }
        if self.transport.pressure() == Pressure::High {
            tracing::debug!(channel = %channel, "bridge transport under pressure, forwarding anyway (best-effort)");
        }
        self.transport.send(Some(&channel), Bytes::copy_from_slice(payload));
    }

    fn socket_control(&mut self, id: &str, payload: &[u8]) {
        let cmd = match crate::frame::parse_command(payload) {
            Ok(cmd) => cmd,
            Err(_) => return self.protocol_error_close_socket(id),
        };

        if cmd.command == "init" {
            if let Some(socket) = self.sockets.get_mut(id) {
                socket.handshaked = true;
            }
            return;
        }

        if !self.sockets.get(id).map(|s| s.handshaked).unwrap_or(false) {
            return self.protocol_error_close_socket(id);
        }

        match cmd.command.as_str() {
            "open" => self.socket_open_channel(id, cmd),
            "close" => {
                if let Some(channel) = cmd.channel {
                    if let Some(socket) = self.sockets.get_mut(id) {
                        socket.channels.remove(&channel);
                    }
                    self.channels.remove(&channel);
                    self.transport.send(None, Bytes::copy_from_slice(payload));
                }
            }
            "kill" => {
                self.transport.send(None, Bytes::copy_from_slice(payload));
            }
            "ping" => {
                if let Some(socket) = self.sockets.get(id) {
                    socket.send(ToClient::Text(Bytes::from(build_control([("command", json!("pong"))]))));
                }
            }
            "authorize" => self.socket_authorize(id, &cmd.options),
            "logout" => {
                self.credentials.poison();
                self.dispose(Some(Problem::Terminated));
            }
            _ => {
                if let Some(channel) = &cmd.channel {
                    if self.channels.contains_key(channel) {
                        self.transport.send(None, Bytes::copy_from_slice(payload));
                    } else {
                        tracing::debug!(command = %cmd.command, "ignoring control for unknown channel");
                    }
                } else {
                    tracing::debug!(command = %cmd.command, "ignoring unknown control command");
                }
            }
        }
    }

    fn socket_open_channel(&mut self, id: &str, cmd: crate::frame::Command) {
        let Some(channel) = cmd.channel.clone() else {
            return self.protocol_error_close_socket(id);
        };
        if self.channels.contains_key(&channel) {
            return self.protocol_error_close_socket(id);
        }
        let flavor =
            if cmd.options.get("binary").and_then(Value::as_str) == Some("raw") { Flavor::Binary } else { Flavor::Text };
        self.channels.insert(channel.clone(), ChannelEntry { owner: ChannelOwner::Socket(id.to_owned()), flavor });
        if let Some(socket) = self.sockets.get_mut(id) {
            socket.channels.insert(channel);
        }
        let body = Value::Object(cmd.options).to_string();
        self.transport.send(None, Bytes::from(body));
    }

    fn socket_authorize(&mut self, id: &str, options: &Map<String, Value>) {
        let Some(response) = options.get("response").and_then(Value::as_str) else {
            return tracing::debug!(socket = %id, "authorize message from socket missing response");
        };
        let Some(("basic", rest)) = response.split_once(':') else {
            return tracing::debug!(socket = %id, "ignoring non-basic in-session authorize response");
        };
        use base64::Engine;
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(rest) else {
            return tracing::debug!(socket = %id, "malformed base64 in authorize response");
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return tracing::debug!(socket = %id, "non-utf8 authorize response");
        };
        if let Some((_user, password)) = text.split_once(':') {
            self.credentials.replace_password(password.as_bytes().to_vec());
            tracing::debug!(socket = %id, "accepted in-session credential update");
        }
    }

    // -- Bridge -> client (§4.4.3) ----------------------------------------

    fn handle_transport_event(&mut self, event: TransportEvent, poison_armed: &mut bool, poison_sleep: &mut std::pin::Pin<Box<Sleep>>) {
        match event {
            TransportEvent::Control { command, channel, options, raw } => {
                self.bridge_control(command, channel, options, raw, poison_armed, poison_sleep)
            }
            TransportEvent::Recv { channel, payload } => self.bridge_recv(channel, payload),
            TransportEvent::Closed { problem } => self.dispose(Some(problem.unwrap_or(Problem::Terminated))),
        }
    }

    fn bridge_control(
        &mut self,
        command: String,
        channel: Option<String>,
        options: Map<String, Value>,
        raw: Bytes,
        poison_armed: &mut bool,
        poison_sleep: &mut std::pin::Pin<Box<Sleep>>,
    ) {
        if let Some(channel) = channel {
            let is_close = command == "close";
            self.route_to_channel_owner(&channel, ExternalEvent::Control { command, options }, Some(&raw));
            if is_close {
                self.channels.remove(&channel);
            }
            return;
        }

        match command.as_str() {
            "init" => self.bridge_init(&options, poison_armed, poison_sleep),
            "authorize" => self.bridge_authorize(&options),
            "superuser-init-done" => {
                self.credentials.poison();
                *poison_armed = false;
            }
            _ => tracing::debug!(%command, "ignoring unknown bridge control command"),
        }
    }

    fn bridge_init(&mut self, options: &Map<String, Value>, poison_armed: &mut bool, poison_sleep: &mut std::pin::Pin<Box<Sleep>>) {
        if self.bridge_init_received {
            // cockpitwebservice.c's process_init runs once; later bridge
            // init messages never re-open the superuser negotiation.
            return;
        }
        self.bridge_init_received = true;

        match options.get("version").and_then(Value::as_i64) {
            Some(1) => {}
            _ => return self.close_bridge(Problem::NotSupported),
        }

        self.superuser_capable = options
            .get("capabilities")
            .and_then(Value::as_array)
            .is_some_and(|caps| caps.iter().any(|c| c.as_str() == Some("explicit-superuser")));

        let mut reply_fields: Vec<(&str, Value)> =
            vec![("command", json!("init")), ("version", json!(1)), ("host", json!("localhost"))];

        if self.superuser_capable {
            match self.credentials.superuser() {
                Some(desc) => reply_fields.push(("superuser", json!({"id": desc.id}))),
                None => {
                    reply_fields.push(("superuser", json!(false)));
                    self.credentials.poison();
                }
            }
        } else {
            *poison_sleep = Box::pin(sleep(self.config.poison_delay()));
            *poison_armed = true;
        }

        self.transport.send(None, Bytes::from(build_control_payload(reply_fields)));
    }

    fn bridge_authorize(&mut self, options: &Map<String, Value>) {
        let Some(cookie) = options.get("cookie").and_then(Value::as_str) else {
            return tracing::debug!("bridge authorize missing cookie");
        };
        let Some(challenge_str) = options.get("challenge").and_then(Value::as_str) else {
            return tracing::debug!("bridge authorize missing challenge");
        };

        let response = match parse_challenge(challenge_str) {
            Some(challenge) if subject_matches(challenge.subject_hex.as_deref(), self.credentials.user()) => {
                build_response(challenge.ty, challenge_str, &self.credentials)
            }
            _ => String::new(),
        };

        let mut fields = vec![("command", json!("authorize")), ("cookie", json!(cookie)), ("response", json!(response))];
        if let Some(host) = options.get("host") {
            fields.push(("host", host.clone()));
        }
        self.transport.send(None, Bytes::from(build_control_payload(fields)));
    }

    fn bridge_recv(&mut self, channel: String, payload: Bytes) {
        self.route_to_channel_owner(&channel, ExternalEvent::Recv(payload), None);
    }

    fn route_to_channel_owner(&mut self, channel: &str, event: ExternalEvent, raw_control: Option<&Bytes>) {
        let Some(entry) = self.channels.get(channel) else {
            tracing::debug!(%channel, "dropping bridge event for unknown channel");
            return;
        };
        match &entry.owner {
            ChannelOwner::External(tx) => {
                let _ = tx.send(event);
            }
            ChannelOwner::Socket(socket_id) => {
                let Some(socket) = self.sockets.get(socket_id) else { return };
                match event {
                    ExternalEvent::Recv(payload) => {
                        let framed = build_frame(Some(channel), &payload);
                        match entry.flavor {
                            Flavor::Text => socket.send(ToClient::Text(Bytes::from(framed))),
                            Flavor::Binary => socket.send(ToClient::Binary(Bytes::from(framed))),
                        }
                    }
                    ExternalEvent::Control { .. } => {
                        if let Some(raw) = raw_control {
                            let framed = build_frame(None, raw);
                            socket.send(ToClient::Text(Bytes::from(framed)));
                        }
                    }
                    ExternalEvent::Closed(_) => {}
                }
            }
        }
    }

    // -- External (ChannelResponse) channels -----------------------------

    fn open_external_channel(&mut self, owner: mpsc::UnboundedSender<ExternalEvent>, open_fields: Map<String, Value>) -> String {
        let channel = format!("0:{}", self.next_channel_seq);
        self.next_channel_seq += 1;

        self.channels.insert(channel.clone(), ChannelEntry { owner: ChannelOwner::External(owner), flavor: Flavor::Binary });

        let mut fields = open_fields;
        fields.insert("command".to_owned(), json!("open"));
        fields.insert("channel".to_owned(), json!(channel));
        let body = Value::Object(fields).to_string();
        self.transport.send(None, Bytes::from(body));
        channel
    }

    // -- Timing & disposal ------------------------------------------------

    fn send_pings(&self) {
        let ping = Bytes::from(build_control([("command", json!("ping"))]));
        for socket in self.sockets.values() {
            socket.send(ToClient::Text(ping.clone()));
        }
    }

    fn close_channel_to_bridge(&self, channel: &str, problem: Option<Problem>) {
        let fields: Vec<(&str, Value)> = match problem {
            Some(p) => vec![("command", json!("close")), ("channel", json!(channel)), ("problem", json!(p.as_str()))],
            None => vec![("command", json!("close")), ("channel", json!(channel))],
        };
        self.transport.send(None, Bytes::from(build_control_payload(fields)));
    }

    fn close_bridge(&mut self, problem: Problem) {
        self.transport.close(Some(problem));
        self.dispose(Some(problem));
    }

    /// Disposal: close every channel/socket, sever the bridge, report
    /// `Disposed`. Safe to call more than once.
    fn dispose(&mut self, problem: Option<Problem>) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let problem = problem.unwrap_or(Problem::Terminated);
        let channels: Vec<String> = self.channels.keys().cloned().collect();
        for channel in &channels {
            self.close_channel_to_bridge(channel, Some(problem));
        }
        self.channels.clear();

        for socket in self.sockets.values() {
            socket.send(ToClient::Text(Bytes::from(build_control([
                ("command", json!("close")),
                ("problem", json!(problem.as_str())),
            ]))));
            socket.send(ToClient::Close { code: CLOSE_CODE_SERVER_ERROR, reason: "terminated" });
        }
        self.sockets.clear();

        self.transport.close(Some(problem));
    }
}
