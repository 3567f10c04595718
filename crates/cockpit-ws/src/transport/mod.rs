// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bridge-facing transport: a framed byte-duplex with `control`/`recv`
//! events and `send`/`close` operations (§4.2).

pub mod process;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::Problem;

/// Outbound-byte high-water mark at which a transport/socket reports
/// back-pressure (§5). Best-effort; neither side is authoritative.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024;

/// Hard ceiling on a single frame body, past which the peer is treated as
/// misbehaving rather than merely large (§4.2 failure semantics).
pub const DEFAULT_FRAME_CEILING: usize = 256 * 1024 * 1024;

/// Hard ceiling on a single control message's JSON body (§8 boundary
/// behaviours: "a control message whose JSON exceeds an
/// implementation-defined hard size is a protocol-error").
pub const DEFAULT_CONTROL_CEILING: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Normal,
    High,
}

/// Events a transport emits, consumed by the owning router's event loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame whose channel id was empty: a control message.
    Control { command: String, channel: Option<String>, options: Map<String, Value>, raw: Bytes },
    /// A frame with a non-empty channel id.
    Recv { channel: String, payload: Bytes },
    /// Emitted exactly once; `None` on clean EOF.
    Closed { problem: Option<Problem> },
}

/// A narrow capability interface over the bridge byte-duplex.
///
/// Only one production implementation exists in this crate
/// ([`process::ProcessTransport`]); the trait exists as an object-safety
/// seam so an alternate transport (e.g. a direct Unix-socket bridge) can be
/// substituted without touching the router.
pub trait Transport: Send + Sync {
    /// Enqueue a frame. Silently dropped if the transport is already closed.
    /// No ordering is implied across channels; within one channel, send
    /// order is preserved.
    fn send(&self, channel: Option<&str>, payload: Bytes);

    /// Begin orderly shutdown. `closed(problem)` follows once writes drain.
    fn close(&self, problem: Option<Problem>);

    /// Current back-pressure state of the outbound queue.
    fn pressure(&self) -> Pressure;
}

/// Handle returned by a transport constructor: the capability plus the
/// event stream the router drains.
pub struct TransportHandle<T: Transport> {
    pub transport: T,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}
