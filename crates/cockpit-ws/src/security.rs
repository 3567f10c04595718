// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed security header set and CSP synthesis rule of spec.md §6,
//! grounded on `original_source/src/common/cockpitwebresponse.c`'s
//! `cockpit_web_response_security_policy` (ported from its `GString`
//! splice-based implementation to owned `String` building).

use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Headers set on every `ChannelResponse` HTTP response regardless of
/// status or content type.
pub fn base_security_headers(headers: &mut HeaderMap) {
    headers.insert("X-DNS-Prefetch-Control", HeaderValue::from_static("off"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("Cross-Origin-Resource-Policy", HeaderValue::from_static("same-origin"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("sameorigin"));
}

/// Synthesise a Content-Security-Policy value from an optional per-response
/// base policy and the server's own origin.
///
/// Any directive named in `base` is kept verbatim (our defaults for that
/// directive are skipped); anything `base` doesn't mention gets the fixed
/// default. `self_origin`, when present, is spliced in after every `'self'`
/// token in the result, and — for `connect-src` specifically — an
/// additional `ws(s)://` variant of the origin is appended so browsers that
/// treat `wss` as a distinct scheme from `https` can still open the
/// multiplex WebSocket back to us.
pub fn content_security_policy(base: Option<&str>, self_origin: Option<&str>) -> String {
    const DEFAULTS: &[(&str, &str)] = &[
        ("default-src ", "default-src 'self'"),
        ("connect-src ", "connect-src 'self'"),
        ("form-action ", "form-action 'self'"),
        ("base-uri ", "base-uri 'self'"),
        ("object-src ", "object-src 'none'"),
        ("font-src ", "font-src 'self' data:"),
        ("img-src ", "img-src 'self' data:"),
        ("block-all-mixed-content", "block-all-mixed-content"),
    ];

    let parts: Vec<String> =
        base.map(|b| b.split(';').map(|p| p.trim().to_owned()).filter(|p| !p.is_empty()).collect()).unwrap_or_default();

    let has_prefix = |prefix: &str| parts.iter().any(|p| p.starts_with(prefix));

    let mut clauses: Vec<String> = Vec::new();
    for (prefix, default) in DEFAULTS {
        if has_prefix(prefix) {
            continue;
        }
        if *prefix == "connect-src " {
            let mut clause = default.to_string();
            if let Some(origin) = self_origin {
                if let Some(rest) = origin.strip_prefix("http") {
                    clause.push_str(&format!(" ws{rest}"));
                }
            }
            clauses.push(clause);
        } else {
            clauses.push((*default).to_owned());
        }
    }
    clauses.extend(parts);

    let mut result = clauses.join("; ");
    if let Some(origin) = self_origin {
        inject_origin(&mut result, origin);
    }
    result
}

/// Insert `" <origin>"` after every occurrence of `'self'` in `policy`.
fn inject_origin(policy: &mut String, origin: &str) {
    let needle = "'self'";
    let mut search_from = 0;
    while let Some(rel) = policy[search_from..].find(needle) {
        let insert_at = search_from + rel + needle.len();
        policy.insert_str(insert_at, &format!(" {origin}"));
        search_from = insert_at + 1 + origin.len();
    }
}

/// Build the `ETag` value for a checksum-addressed resource: the checksum
/// plus the serving language, e.g. `"$<hex>-<lang>"`. `lang` defaults to
/// `"c"` (the original's stand-in for the "no language negotiated" case).
pub fn checksum_etag(checksum: &str, lang: Option<&str>) -> String {
    format!("\"{checksum}-{}\"", lang.unwrap_or("c"))
}

/// Parse the `CockpitLang` cookie value out of a raw `Cookie` header, if any.
pub fn cookie_language(cookie_header: Option<&str>) -> Option<String> {
    let header = cookie_header?;
    header.split(';').map(str::trim).find_map(|kv| kv.strip_prefix("CockpitLang=")).map(str::to_owned)
}

/// A header name constant pulled out for places that build `HeaderMap`s
/// from a bridge-supplied string map and need a fallible conversion.
pub fn header_name(name: &str) -> Option<HeaderName> {
    HeaderName::from_bytes(name.as_bytes()).ok()
}
