// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The one concrete [`Transport`](super::Transport): a child process's
//! stdio, framed with a decimal length prefix (§4.2, §6).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use super::{Pressure, Transport, TransportEvent, TransportHandle, DEFAULT_FRAME_CEILING, DEFAULT_HIGH_WATER_MARK};
use crate::error::Problem;
use crate::frame::{build_frame, parse_command, parse_frame};

enum Outgoing {
    Frame(Option<String>, Bytes),
    Close,
}

struct Inner {
    out_tx: mpsc::UnboundedSender<Outgoing>,
    pending_bytes: AtomicUsize,
    high_water_mark: usize,
    close_problem: Mutex<Option<Problem>>,
}

/// A bridge transport backed by a spawned child process's stdio.
#[derive(Clone)]
pub struct ProcessTransport {
    inner: Arc<Inner>,
}

impl ProcessTransport {
    /// Spawn `command` with `args` and wire up its stdio as the transport.
    ///
    /// Failure here (binary missing, exec permission denied, …) is the
    /// caller's to classify into a `Problem` — see §7's
    /// "bridge spawn failure" row.
    pub fn spawn(command: &str, args: &[String]) -> std::io::Result<TransportHandle<ProcessTransport>> {
        Self::spawn_with_limits(
            command,
            args,
            DEFAULT_FRAME_CEILING,
            super::DEFAULT_CONTROL_CEILING,
            DEFAULT_HIGH_WATER_MARK,
        )
    }

    pub fn spawn_with_limits(
        command: &str,
        args: &[String],
        frame_ceiling: usize,
        control_ceiling: usize,
        high_water_mark: usize,
    ) -> std::io::Result<TransportHandle<ProcessTransport>> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let io_missing = || std::io::Error::new(std::io::ErrorKind::Other, "child stdio not piped");
        let stdin = child.stdin.take().ok_or_else(io_missing)?;
        let stdout = child.stdout.take().ok_or_else(io_missing)?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            out_tx,
            pending_bytes: AtomicUsize::new(0),
            high_water_mark,
            close_problem: Mutex::new(None),
        });

        tokio::spawn(writer_loop(stdin, out_rx, Arc::clone(&inner)));
        tokio::spawn(reader_loop(child, stdout, frame_ceiling, control_ceiling, events_tx, Arc::clone(&inner)));

        Ok(TransportHandle { transport: ProcessTransport { inner }, events: events_rx })
    }
}

impl Transport for ProcessTransport {
    fn send(&self, channel: Option<&str>, payload: Bytes) {
        let len = channel.map_or(0, str::len) + 1 + payload.len();
        if self.inner.out_tx.send(Outgoing::Frame(channel.map(str::to_owned), payload)).is_ok() {
            self.inner.pending_bytes.fetch_add(len, Ordering::Relaxed);
        }
    }

    fn close(&self, problem: Option<Problem>) {
        let mut slot = self.inner.close_problem.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(problem.unwrap_or(Problem::Terminated));
        drop(slot);
        let _ = self.inner.out_tx.send(Outgoing::Close);
    }

    fn pressure(&self) -> Pressure {
        if self.inner.pending_bytes.load(Ordering::Relaxed) > self.inner.high_water_mark {
            Pressure::High
        } else {
            Pressure::Normal
        }
    }
}

async fn writer_loop(mut stdin: ChildStdin, mut out_rx: mpsc::UnboundedReceiver<Outgoing>, inner: Arc<Inner>) {
    while let Some(msg) = out_rx.recv().await {
        match msg {
            Outgoing::Frame(channel, payload) => {
                let body = build_frame(channel.as_deref(), &payload);
                let header = format!("{}\n", body.len());
                let written = body.len();
                let result = async {
                    stdin.write_all(header.as_bytes()).await?;
                    stdin.write_all(&body).await?;
                    stdin.flush().await
                }
                .await;
                match result {
                    Ok(()) => inner.pending_bytes.fetch_sub(written, Ordering::Relaxed),
                    Err(err) => {
                        // §7's suppression rule: a write failure that just means
                        // the bridge hung up is debug noise, not a warning.
                        let problem = Problem::from(err);
                        if problem.is_routine_disconnect() {
                            tracing::debug!(%problem, "bridge write failed");
                        } else {
                            tracing::warn!(%problem, "bridge write failed");
                        }
                        break;
                    }
                };
            }
            Outgoing::Close => break,
        }
    }
    // Dropping stdin sends EOF to the child; the reader side observes this
    // and classifies the final `closed` problem.
    drop(stdin);
}

async fn reader_loop(
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    frame_ceiling: usize,
    control_ceiling: usize,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    inner: Arc<Inner>,
) {
    let mut reader = BufReader::new(stdout);
    let problem = loop {
        match read_length_prefix(&mut reader).await {
            Ok(None) => break final_problem(&inner, &mut child).await,
            Ok(Some(len)) if len > frame_ceiling => break Some(Problem::ProtocolError),
            Ok(Some(len)) => {
                let mut buf = vec![0u8; len];
                if reader.read_exact(&mut buf).await.is_err() {
                    break Some(Problem::Disconnected);
                }
                match parse_frame(&buf) {
                    Ok((None, payload)) if payload.len() > control_ceiling => {
                        break Some(Problem::ProtocolError)
                    }
                    Ok((None, payload)) => match parse_command(payload) {
                        Ok(cmd) => {
                            let raw = Bytes::copy_from_slice(payload);
                            let _ = events_tx.send(TransportEvent::Control {
                                command: cmd.command,
                                channel: cmd.channel,
                                options: cmd.options,
                                raw,
                            });
                        }
                        Err(_) => break Some(Problem::ProtocolError),
                    },
                    Ok((Some(channel), payload)) => {
                        let _ = events_tx.send(TransportEvent::Recv {
                            channel,
                            payload: Bytes::copy_from_slice(payload),
                        });
                    }
                    Err(_) => break Some(Problem::ProtocolError),
                }
            }
            Err(_) => break Some(Problem::ProtocolError),
        }
    };

    let _ = inner.out_tx.send(Outgoing::Close);
    let _ = events_tx.send(TransportEvent::Closed { problem });
}

/// Read the decimal ASCII length prefix up to the terminating LF.
/// `Ok(None)` signals clean EOF before any byte of a new prefix was read.
async fn read_length_prefix<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<usize>> {
    use tokio::io::AsyncBufReadExt;
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches('\n');
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad length prefix"))
}

async fn final_problem(inner: &Arc<Inner>, child: &mut Child) -> Option<Problem> {
    if let Some(requested) = *inner.close_problem.lock() {
        return Some(requested);
    }
    match child.wait().await {
        Ok(status) if status.success() => None,
        _ => Some(Problem::Terminated),
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
