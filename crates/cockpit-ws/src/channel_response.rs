// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ChannelResponse` (§4.5): a transient adapter that tunnels one HTTP
//! request/response pair through a one-shot channel on the router, the way
//! `original_source/src/ws/cockpitwebservice.c`'s
//! `cockpit_channel_response_serve` tunnels resource fetches over the same
//! bridge connection a WebSocket's channels use.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::error::Problem;
use crate::router::{ExternalEvent, WebServiceHandle};
use crate::security;

/// Everything `serve` needs out of the inbound HTTP request; the HTTP
/// listener that parses a real request into this shape is out of core
/// scope (§1).
pub struct ResourceRequest {
    pub method: Method,
    /// The resource's declared host, e.g. `"@localhost"` for a same-machine
    /// resource or `"$<hex>"` for a checksum-addressed (immutable) one.
    pub host: String,
    pub path: String,
    pub accept_language: Vec<String>,
    pub cookie_language: Option<String>,
    pub if_none_match: Option<String>,
    /// This server's own origin, for CSP synthesis and
    /// `Access-Control-Allow-Origin` (§6).
    pub origin: Option<String>,
    /// A per-response base CSP, if the caller wants one merged in (§6).
    pub base_csp: Option<String>,
}

/// Serve one resource fetch by opening a channel on `handle`, waiting for
/// the bridge's `response` control message, then streaming the body.
pub async fn serve(handle: &WebServiceHandle, req: ResourceRequest) -> Response {
    let checksum = req.host.strip_prefix('$').map(str::to_owned);

    let mut languages = Vec::new();
    if let Some(lang) = &req.cookie_language {
        languages.push(lang.clone());
    }
    languages.extend(req.accept_language.iter().cloned());

    let mut open_fields = Map::new();
    open_fields.insert("payload".to_owned(), json!("http-stream1"));
    open_fields.insert("host".to_owned(), json!(req.host));
    open_fields.insert("path".to_owned(), json!(req.path));
    open_fields.insert("method".to_owned(), json!(req.method.as_str()));
    if !languages.is_empty() {
        open_fields.insert("accept-language".to_owned(), json!(languages));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let Some(channel) = handle.open_external_channel(open_fields, tx).await else {
        return internal_error_response("no bridge available");
    };
    // No request body: this is a GET/HEAD resource fetch.
    handle.external_done(channel.clone());

    let (status, reason, bridge_headers) = loop {
        match rx.recv().await {
            Some(ExternalEvent::Control { command, options }) if command == "response" => {
                break response_fields(&options)
            }
            Some(ExternalEvent::Control { command, options }) if command == "close" => {
                let problem = options
                    .get("problem")
                    .and_then(Value::as_str)
                    .and_then(Problem::from_token)
                    .unwrap_or(Problem::InternalError);
                return problem_response(problem);
            }
            Some(ExternalEvent::Control { .. }) => continue,
            Some(ExternalEvent::Closed(problem)) => {
                return problem_response(problem.unwrap_or(Problem::InternalError))
            }
            Some(ExternalEvent::Recv(_)) => continue,
            None => return internal_error_response("bridge channel closed before responding"),
        }
    };

    // A checksum-addressed resource's ETag is synthesized from the checksum
    // plus the serving language (§4.5, §6): it is the whole point of
    // addressing a resource by checksum, so it must not depend on the
    // bridge happening to echo one back. Any other resource is only as
    // cacheable as the bridge's own `etag` header says it is.
    let etag = match &checksum {
        Some(checksum) => {
            let serving_language = bridge_headers.get("content-language").cloned().or_else(|| languages.first().cloned());
            Some(security::checksum_etag(checksum, serving_language.as_deref()))
        }
        None => bridge_headers.get("etag").cloned(),
    };
    if let (Some(etag), Some(if_none_match)) = (&etag, &req.if_none_match) {
        if etag == if_none_match {
            handle.external_close(channel);
            let mut headers = HeaderMap::new();
            security::base_security_headers(&mut headers);
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert("ETag", value);
            }
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }
    }

    let mut headers = HeaderMap::new();
    security::base_security_headers(&mut headers);
    const HANDLED_ELSEWHERE: &[&str] = &["content-type", "etag"];
    for (name, value) in &bridge_headers {
        if HANDLED_ELSEWHERE.contains(&name.as_str()) {
            continue;
        }
        if let (Some(name), Ok(value)) = (security::header_name(name), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
    let content_type = bridge_headers.get("content-type").cloned();
    if let Some(ct) = &content_type {
        if let Ok(value) = HeaderValue::from_str(ct) {
            headers.insert(axum::http::header::CONTENT_TYPE, value);
        }
        if ct.starts_with("text/html") {
            let csp = security::content_security_policy(req.base_csp.as_deref(), req.origin.as_deref());
            if let Ok(value) = HeaderValue::from_str(&csp) {
                headers.insert("Content-Security-Policy", value);
            }
        }
    }
    if let Some(etag) = &etag {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert("ETag", value);
        }
    }
    if let Some(origin) = &req.origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            headers.insert("Access-Control-Allow-Origin", value);
        }
    }
    if checksum.is_some() {
        headers.insert("Cache-Control", HeaderValue::from_static("max-age=31556926, public"));
    } else {
        headers.insert("Cache-Control", HeaderValue::from_static("no-cache, no-store"));
        headers.insert("Vary", HeaderValue::from_static("Cookie"));
    }

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let _ = reason;

    if req.method == Method::HEAD {
        handle.external_close(channel);
        return (status, headers, Body::empty()).into_response();
    }

    let guard = BodyGuard { handle: handle.clone(), channel, finished: false };
    let body_stream = stream::unfold((rx, guard), |(mut rx, mut guard)| async move {
        loop {
            match rx.recv().await {
                Some(ExternalEvent::Recv(payload)) => {
                    return Some((Ok::<Bytes, Infallible>(payload), (rx, guard)))
                }
                Some(ExternalEvent::Control { command, .. }) if command == "close" => {
                    guard.finished = true;
                    return None;
                }
                Some(ExternalEvent::Control { .. }) => continue,
                Some(ExternalEvent::Closed(_)) | None => {
                    guard.finished = true;
                    return None;
                }
            }
        }
    });

    (status, headers, Body::from_stream(body_stream)).into_response()
}

/// Parse a `{"command":"response","status":...,"reason":...,"headers":{...}}`
/// control message into (status, reason, lower-cased header map).
fn response_fields(options: &Map<String, Value>) -> (u16, String, std::collections::HashMap<String, String>) {
    let status = options.get("status").and_then(Value::as_u64).unwrap_or(200) as u16;
    let reason = options.get("reason").and_then(Value::as_str).unwrap_or("OK").to_owned();
    let mut headers = std::collections::HashMap::new();
    if let Some(Value::Object(h)) = options.get("headers") {
        for (k, v) in h {
            if let Some(s) = v.as_str() {
                headers.insert(k.to_lowercase(), s.to_owned());
            }
        }
    }
    (status, reason, headers)
}

/// The boilerplate error page the original emits for non-2xx resource
/// responses (§4.5 point 4).
fn problem_response(problem: Problem) -> Response {
    let status = problem.http_status();
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!("<html><head><title>\n{reason}\n</title></head><body>\n{reason}\n</body></html>\n");
    let mut headers = HeaderMap::new();
    security::base_security_headers(&mut headers);
    headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf8"));
    (status, headers, body).into_response()
}

fn internal_error_response(message: &'static str) -> Response {
    tracing::debug!(%message, "channel response failed before bridge answered");
    problem_response(Problem::InternalError)
}

/// Cuts the bridge channel short if the HTTP body stream is dropped before
/// it observes the bridge's own `close` (the client disconnected mid-stream,
/// §4.5 point 5).
struct BodyGuard {
    handle: WebServiceHandle,
    channel: String,
    finished: bool,
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.handle.external_close(self.channel.clone());
        }
    }
}
