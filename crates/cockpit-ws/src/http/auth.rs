// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stand-in for the out-of-scope credential/authentication subsystem
//! (spec.md §1's "the core consumes an opaque `Credentials` handle"). A real
//! deployment sits this crate behind a login flow that inserts a
//! pre-authenticated `Credentials` into the request; here we derive one
//! directly from HTTP Basic auth so the router has an identity to thread
//! into the bridge.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use base64::Engine;
use rand::Rng;

use crate::credentials::Credentials;

/// An axum extractor that turns an `Authorization: Basic` header into an
/// opaque [`Credentials`] handle. Rejects the request with 401 when the
/// header is absent or malformed.
pub struct AuthenticatedCredentials(pub Credentials);

impl<S> FromRequestParts<S> for AuthenticatedCredentials
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let rhost = remote_host(&parts.headers);
        decode_basic(&parts.headers)
            .map(|(user, password)| {
                AuthenticatedCredentials(Credentials::new(
                    user,
                    password,
                    rhost,
                    generate_csrf_token(),
                    None,
                ))
            })
            .ok_or((StatusCode::UNAUTHORIZED, "missing or malformed Authorization header"))
    }
}

fn decode_basic(headers: &HeaderMap) -> Option<(String, Vec<u8>)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_owned(), password.as_bytes().to_vec()))
}

fn remote_host(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("")
        .to_owned()
}

/// A fresh per-socket csrf token, analogous to `generate_state` in
/// the teacher's PKCE helper.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
