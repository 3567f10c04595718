// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing: `<channel-id>\n<payload>` and the JSON control envelope
//! carried on the empty channel.

use serde_json::{Map, Value};

use crate::error::Problem;

/// Build a frame body for `channel` (`None` for the control channel).
pub fn build_frame(channel: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(channel.map_or(0, str::len) + 1 + payload.len());
    out.extend_from_slice(channel.unwrap_or("").as_bytes());
    out.push(b'\n');
    out.extend_from_slice(payload);
    out
}

/// Split a frame body into its channel id (`None` for control) and payload.
///
/// Fails if no LF separator is present.
pub fn parse_frame(bytes: &[u8]) -> Result<(Option<String>, &[u8]), Problem> {
    let pos = bytes.iter().position(|&b| b == b'\n').ok_or(Problem::ProtocolError)?;
    let (id, rest) = bytes.split_at(pos);
    let payload = &rest[1..];
    if id.is_empty() {
        Ok((None, payload))
    } else {
        let id = std::str::from_utf8(id).map_err(|_| Problem::ProtocolError)?;
        Ok((Some(id.to_owned()), payload))
    }
}

/// A parsed control command: the command name, an optional target channel,
/// and the full options object (including `command`/`channel`).
pub struct Command {
    pub command: String,
    pub channel: Option<String>,
    pub options: Map<String, Value>,
}

/// Parse a control frame payload into a [`Command`].
///
/// Requires a JSON object with a string `"command"` field; `"channel"`, if
/// present, must also be a string.
pub fn parse_command(payload: &[u8]) -> Result<Command, Problem> {
    let value: Value = serde_json::from_slice(payload).map_err(|_| Problem::ProtocolError)?;
    let Value::Object(options) = value else {
        return Err(Problem::ProtocolError);
    };
    let command = match options.get("command") {
        Some(Value::String(s)) => s.clone(),
        _ => return Err(Problem::ProtocolError),
    };
    let channel = match options.get("channel") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err(Problem::ProtocolError),
    };
    Ok(Command { command, channel, options })
}

/// Build a control frame body from a list of string/JSON-value members.
///
/// The first pair is conventionally `("command", ...)`. This includes the
/// `<empty>\n` frame prefix, ready to hand straight to a WebSocket client as
/// a text message.
pub fn build_control<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Vec<u8> {
    build_frame(None, &build_control_payload(fields))
}

/// Build just the JSON body of a control message, with no frame prefix.
///
/// [`crate::transport::Transport::send`] implementations add their own
/// `<channel>\n` prefix on the way out, so callers sending to a [`Transport`]
/// (as opposed to a WebSocket client) must pass this, not [`build_control`]'s
/// already-framed output.
///
/// [`Transport`]: crate::transport::Transport
pub fn build_control_payload<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Vec<u8> {
    let mut map = Map::new();
    for (k, v) in fields {
        map.insert(k.to_owned(), v);
    }
    Value::Object(map).to_string().into_bytes()
}
