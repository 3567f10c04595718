// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router-level bookkeeping for one attached WebSocket (§3 "Socket").

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Declared payload flavor of a channel, fixed at `open` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Text,
    Binary,
}

/// A message the router sends outward to a socket's connection task.
#[derive(Debug)]
pub enum ToClient {
    Text(Bytes),
    Binary(Bytes),
    Close { code: u16, reason: &'static str },
}

/// axum close-frame code for a server-initiated protocol-error teardown.
pub const CLOSE_CODE_SERVER_ERROR: u16 = 1011;

/// One client WebSocket attached to the router.
pub struct SocketState {
    /// Short id used as the channel-seed prefix for this socket's
    /// client-chosen channel ids.
    pub id: String,
    pub to_client: mpsc::UnboundedSender<ToClient>,
    /// Channel ids owned by this socket, with their declared flavor.
    pub channels: HashSet<String>,
    /// Set once this socket's own `init` handshake has been received.
    pub handshaked: bool,
}

impl SocketState {
    pub fn new(id: String, to_client: mpsc::UnboundedSender<ToClient>) -> Self {
        Self { id, to_client, channels: HashSet::new(), handshaked: false }
    }

    pub fn send(&self, msg: ToClient) {
        let _ = self.to_client.send(msg);
    }
}
