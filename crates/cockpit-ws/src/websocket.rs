// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The server-side WebSocket endpoint: subprotocol negotiation, origin
//! enforcement, and the explicit connection-state tracking axum itself
//! does not expose (§4.3).

use axum::http::HeaderMap;

/// Connection state. axum's `WebSocketUpgrade` completes CONNECTING for
/// us; this enum tracks the remainder of the lifecycle explicitly so the
/// router can reason about OPEN vs CLOSING without probing the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The subprotocol this crate speaks; handshake fails if the client does
/// not offer it.
pub const SUBPROTOCOL: &str = "cockpit1";

/// Pick `"cockpit1"` out of a client's offered subprotocol list, or `None`
/// if absent (handshake should then be rejected).
pub fn negotiate_subprotocol<'a>(offered: impl IntoIterator<Item = &'a str>) -> Option<&'static str> {
    offered.into_iter().any(|p| p == SUBPROTOCOL).then_some(SUBPROTOCOL)
}

/// Resolve the origin a connecting client is allowed to claim.
///
/// When `allowed_origins` is empty, derive the single implicit origin from
/// the `Host` header and whether the connection is effectively TLS
/// (`tls || behind_tls_proxy`), per §4.3.
pub fn allowed_origins(
    headers: &HeaderMap,
    configured: &[String],
    tls: bool,
    behind_tls_proxy: bool,
) -> Vec<String> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    let scheme = if tls || behind_tls_proxy { "wss" } else { "ws" };
    match headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => vec![format!("{scheme}://{host}")],
        None => Vec::new(),
    }
}

/// Whether the request's `Origin` header is present in the allowed set.
pub fn origin_is_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    allowed.iter().any(|a| a == origin)
}
