// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use bytes::Bytes;

use super::*;
use crate::transport::{Transport, TransportEvent};

/// A shell one-liner that echoes back one length-prefixed frame exactly as
/// received, standing in for a real bridge process in these tests.
const ECHO_BRIDGE: &str = "read -r n && dd bs=1 count=\"$n\" 2>/dev/null";

#[tokio::test]
async fn echoes_a_recv_frame() {
    let TransportHandle { transport, mut events } =
        ProcessTransport::spawn("sh", &["-c".to_owned(), ECHO_BRIDGE.to_owned()]).unwrap();

    transport.send(Some("a"), Bytes::from_static(b"hello"));

    let event = events.recv().await.unwrap();
    match event {
        TransportEvent::Recv { channel, payload } => {
            assert_eq!(channel, "a");
            assert_eq!(payload, Bytes::from_static(b"hello"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn close_drains_then_reports_closed() {
    let TransportHandle { transport, mut events } =
        ProcessTransport::spawn("sh", &["-c".to_owned(), ECHO_BRIDGE.to_owned()]).unwrap();

    transport.close(Some(Problem::Terminated));
    // drain the echoed-nothing transport until Closed.
    loop {
        match events.recv().await {
            Some(TransportEvent::Closed { problem }) => {
                assert_eq!(problem, Some(Problem::Terminated));
                break;
            }
            Some(_) => continue,
            None => panic!("event stream ended without Closed"),
        }
    }
}

#[tokio::test]
async fn spawn_failure_surfaces_as_io_error() {
    let result = ProcessTransport::spawn("cockpit-ws-nonexistent-binary-xyz", &[]);
    assert!(result.is_err());
}

#[tokio::test]
async fn oversized_control_message_is_a_protocol_error() {
    // A "bridge" that sends one oversized control frame: an empty channel
    // id followed by a JSON body bigger than the configured ceiling.
    const SEND_OVERSIZED: &str = r#"body=$(printf '\n{"command":"init","version":1,"pad":"%0200d"}' 0); printf '%d\n%s' ${#body} "$body"; cat >/dev/null"#;
    let TransportHandle { transport: _transport, mut events } = ProcessTransport::spawn_with_limits(
        "sh",
        &["-c".to_owned(), SEND_OVERSIZED.to_owned()],
        super::DEFAULT_FRAME_CEILING,
        32,
        super::DEFAULT_HIGH_WATER_MARK,
    )
    .unwrap();

    loop {
        match events.recv().await {
            Some(TransportEvent::Closed { problem }) => {
                assert_eq!(problem, Some(Problem::ProtocolError));
                break;
            }
            Some(_) => continue,
            None => panic!("event stream ended without Closed"),
        }
    }
}

#[test]
fn pressure_flips_at_high_water_mark() {
    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let inner = Inner {
        out_tx,
        pending_bytes: AtomicUsize::new(0),
        high_water_mark: 10,
        close_problem: Mutex::new(None),
    };
    let transport = ProcessTransport { inner: Arc::new(inner) };
    assert_eq!(transport.pressure(), Pressure::Normal);
    transport.send(None, Bytes::from_static(b"0123456789012345"));
    assert_eq!(transport.pressure(), Pressure::High);
}
