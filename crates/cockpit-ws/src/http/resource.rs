// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The resource-serving route (§4.5, §6): binds an HTTP GET/HEAD to an
//! existing session's router via [`ChannelResponse`](crate::channel_response).
//!
//! Exposing the session id as a URL segment is a simplification of the
//! out-of-scope auth/session subsystem, which in a full deployment would
//! resolve a browser's session cookie to a router without the caller
//! needing to name it explicitly.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::channel_response::{self, ResourceRequest};
use crate::http::AppState;
use crate::security;

/// `GET|HEAD /resource/{session_id}/{host}/{*path}`.
pub async fn resource_handler(
    State(state): State<Arc<AppState>>,
    Path((session_id, host, path)): Path<(String, String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some(handle) = state.sessions.lock().get(&session_id).cloned() else {
        return (StatusCode::NOT_FOUND, "no such session").into_response();
    };

    let accept_language = headers
        .get(axum::http::header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .map(parse_accept_language)
        .unwrap_or_default();
    let cookie_language =
        security::cookie_language(headers.get(axum::http::header::COOKIE).and_then(|v| v.to_str().ok()));
    let if_none_match =
        headers.get(axum::http::header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()).map(str::to_owned);
    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_owned);

    let req = ResourceRequest {
        method,
        host,
        path,
        accept_language,
        cookie_language,
        if_none_match,
        origin,
        base_csp: None,
    };

    channel_response::serve(&handle, req).await
}

/// Parse an `Accept-Language` header into an ordered list of language tags,
/// dropping `q=` weights (the bridge, not this crate, resolves fallback).
fn parse_accept_language(header: &str) -> Vec<String> {
    header.split(',').map(str::trim).filter_map(|tag| tag.split(';').next()).map(str::to_owned).collect()
}
