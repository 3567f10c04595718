// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The multiplex WebSocket upgrade endpoint (§4.3), grounded on the
//! teacher's `transport::ws::ws_handler`/`handle_ws` shape: validate, look
//! up or create the backing session, then run a `tokio::select!` loop
//! shuttling frames between the socket and the router.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;

use crate::http::auth::AuthenticatedCredentials;
use crate::http::AppState;
use crate::router::socket::ToClient;
use crate::router::{self, RouterEvent, WebServiceHandle};
use crate::transport::process::ProcessTransport;
use crate::websocket::{allowed_origins, negotiate_subprotocol, origin_is_allowed, WsState, SUBPROTOCOL};

/// `GET /cockpit/socket` — upgrade to the `cockpit1` multiplex protocol.
///
/// Spawns a fresh bridge subprocess and router for this connection; the
/// router is registered under a freshly minted session id so subsequent
/// `ChannelResponse` HTTP requests (§4.5) can reuse it.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    AuthenticatedCredentials(credentials): AuthenticatedCredentials,
) -> Response {
    let offered = headers
        .get(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(str::trim).collect::<Vec<_>>())
        .unwrap_or_default();
    if negotiate_subprotocol(offered).is_none() {
        return (axum::http::StatusCode::BAD_REQUEST, "cockpit1 subprotocol required").into_response();
    }

    let allowed = allowed_origins(&headers, &state.config.allowed_origins, false, state.config.behind_tls_proxy);
    if !origin_is_allowed(&headers, &allowed) {
        return (axum::http::StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let transport_handle = match ProcessTransport::spawn_with_limits(
        "sh",
        &["-c".to_owned(), state.config.bridge_command.clone()],
        state.config.frame_ceiling,
        state.config.control_ceiling,
        state.config.pressure_high_water_mark,
    ) {
        Ok(handle) => handle,
        Err(err) => {
            tracing::warn!(%err, "failed to spawn bridge process");
            return (axum::http::StatusCode::BAD_GATEWAY, "bridge unavailable").into_response();
        }
    };

    let (router_handle, router_events) = router::spawn(
        Arc::clone(&state.config),
        Arc::new(credentials),
        Box::new(transport_handle.transport),
        transport_handle.events,
    );

    let session_id = random_hex_id();
    state.sessions.lock().insert(session_id.clone(), router_handle.clone());
    tokio::spawn(reap_on_disposal(Arc::clone(&state), session_id.clone(), router_events));

    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| handle_socket(socket, router_handle))
}

/// Remove a session from the registry once its router reports disposal, so
/// `ChannelResponse` requests stop being routed to a dead router.
async fn reap_on_disposal(state: Arc<AppState>, session_id: String, mut events: mpsc::UnboundedReceiver<RouterEvent>) {
    while let Some(event) = events.recv().await {
        if matches!(event, RouterEvent::Disposed) {
            state.sessions.lock().remove(&session_id);
            return;
        }
    }
}

async fn handle_socket(socket: WebSocket, handle: WebServiceHandle) {
    let socket_id = random_hex_id();
    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel();

    let mut state = WsState::Connecting;
    let Some(init_frame) = handle.socket_open(socket_id.clone(), to_client_tx).await else {
        return;
    };

    use futures_util::{SinkExt, StreamExt};
    let (mut ws_tx, mut ws_rx) = socket.split();
    if ws_tx.send(Message::Text(bytes_to_text(init_frame))).await.is_err() {
        handle.socket_closed(socket_id);
        return;
    }
    state = WsState::Open;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle.socket_frame(socket_id.clone(), Bytes::from(text.as_bytes().to_vec()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        handle.socket_frame(socket_id.clone(), bytes);
                    }
                    Some(Ok(Message::Close(_))) | None => { state = WsState::Closing; break }
                    Some(Err(_)) => { state = WsState::Closing; break }
                    _ => {}
                }
            }
            out = to_client_rx.recv() => {
                match out {
                    Some(ToClient::Text(bytes)) => {
                        if ws_tx.send(Message::Text(bytes_to_text(bytes))).await.is_err() {
                            state = WsState::Closing;
                            break;
                        }
                    }
                    Some(ToClient::Binary(bytes)) => {
                        if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                            state = WsState::Closing;
                            break;
                        }
                    }
                    Some(ToClient::Close { code, reason }) => {
                        state = WsState::Closing;
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                            .await;
                        break;
                    }
                    None => { state = WsState::Closing; break }
                }
            }
        }
    }

    tracing::trace!(socket = %socket_id, ?state, "websocket connection task winding down");
    state = WsState::Closed;
    tracing::debug!(socket = %socket_id, ?state, "websocket closed");
    handle.socket_closed(socket_id);
}

fn bytes_to_text(bytes: Bytes) -> axum::extract::ws::Utf8Bytes {
    // The router only ever builds frames from UTF-8 JSON and ASCII channel
    // ids, so a lossy fallback here would only trigger on a bridge bug; we
    // still prefer it to a panic on the connection task.
    String::from_utf8_lossy(&bytes).into_owned().into()
}

/// A fresh random identifier for a session or socket bookkeeping key.
fn random_hex_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
