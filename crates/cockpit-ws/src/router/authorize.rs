// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The bridge `authorize` challenge/response protocol (§4.4.4).

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::credentials::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Plain1,
    Crypt1,
    Basic,
}

impl ChallengeType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "plain1" => Some(Self::Plain1),
            "crypt1" => Some(Self::Crypt1),
            "basic" => Some(Self::Basic),
            _ => None,
        }
    }
}

/// A parsed `"<type>[:<subject>]"` challenge string.
pub struct Challenge {
    pub ty: ChallengeType,
    pub subject_hex: Option<String>,
}

/// Parse a challenge string. Returns `None` for an unrecognized type,
/// which the caller answers with an empty response rather than an error
/// (§4's note on `cockpitauth.c`'s tolerant handling).
pub fn parse_challenge(challenge: &str) -> Option<Challenge> {
    let mut parts = challenge.splitn(2, ':');
    let ty = ChallengeType::parse(parts.next()?)?;
    let subject_hex = parts.next().map(str::to_owned);
    Some(Challenge { ty, subject_hex })
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

/// Whether the challenge's hex-encoded subject names `user` (or its
/// lowercase form), or is absent entirely (§8's quantified invariant).
pub fn subject_matches(subject_hex: Option<&str>, user: &str) -> bool {
    let Some(hex) = subject_hex else {
        return true;
    };
    let Some(bytes) = hex_decode(hex) else {
        return false;
    };
    let Ok(subject) = String::from_utf8(bytes) else {
        return false;
    };
    subject == user || subject == user.to_lowercase()
}

/// Build the `authorize` response body for a matched challenge.
///
/// Returns the empty string if credentials carry no password (poisoned or
/// never set), matching §4.4.4's final rule.
pub fn build_response(ty: ChallengeType, challenge: &str, creds: &Credentials) -> String {
    let Some(password) = creds.password() else {
        return String::new();
    };
    match ty {
        ChallengeType::Plain1 => String::from_utf8_lossy(&password).into_owned(),
        ChallengeType::Crypt1 => crypt1_reply(challenge, &password),
        ChallengeType::Basic => {
            let plain = format!("{}:{}", creds.user(), String::from_utf8_lossy(&password));
            base64::engine::general_purpose::STANDARD.encode(plain)
        }
    }
}

/// A deterministic stand-in for the legacy DES-`crypt(3)`-based `crypt1`
/// reply. cockpit's real implementation salts with the challenge and
/// hands the result to glibc `crypt()`; that primitive has no idiomatic
/// Rust equivalent available here, so this keys a SHA-256 digest with the
/// challenge instead. `crypt1` is deprecated in favor of `plain1`/`basic`
/// and no caller in this crate round-trips it against a real bridge.
fn crypt1_reply(challenge: &str, password: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b":");
    hasher.update(password);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds_with_password(user: &str, password: &[u8]) -> Credentials {
        Credentials::new(user, password.to_vec(), "", "", None)
    }

    #[test]
    fn parses_known_challenge_types() {
        let c = parse_challenge("basic:616c696365").unwrap();
        assert_eq!(c.ty, ChallengeType::Basic);
        assert_eq!(c.subject_hex.as_deref(), Some("616c696365"));
    }

    #[test]
    fn unrecognized_type_is_none() {
        assert!(parse_challenge("newfangled1:616c696365").is_none());
    }

    #[test]
    fn subject_matches_hex_user() {
        // "alice" hex-encoded
        assert!(subject_matches(Some("616c696365"), "alice"));
        assert!(!subject_matches(Some("616c696365"), "bob"));
    }

    #[test]
    fn absent_subject_always_matches() {
        assert!(subject_matches(None, "alice"));
    }

    #[test]
    fn subject_matches_lowercase_fold() {
        // "Alice" hex-encoded compared against lowercase creds.user()
        let hex: String = "Alice".bytes().map(|b| format!("{b:02x}")).collect();
        assert!(subject_matches(Some(&hex), "alice"));
    }

    #[test]
    fn basic_response_is_base64_user_colon_password() {
        let creds = creds_with_password("alice", b"hunter2");
        let resp = build_response(ChallengeType::Basic, "basic:...", &creds);
        let decoded = base64::engine::general_purpose::STANDARD.decode(resp).unwrap();
        assert_eq!(decoded, b"alice:hunter2");
    }

    #[test]
    fn plain1_response_is_raw_password() {
        let creds = creds_with_password("alice", b"hunter2");
        assert_eq!(build_response(ChallengeType::Plain1, "plain1", &creds), "hunter2");
    }

    #[test]
    fn poisoned_credentials_answer_empty() {
        let creds = creds_with_password("alice", b"hunter2");
        creds.poison();
        assert_eq!(build_response(ChallengeType::Plain1, "plain1", &creds), "");
        assert_eq!(build_response(ChallengeType::Basic, "basic", &creds), "");
    }

    #[test]
    fn crypt1_is_deterministic_and_password_sensitive() {
        let a = creds_with_password("alice", b"hunter2");
        let b = creds_with_password("alice", b"other");
        let r1 = build_response(ChallengeType::Crypt1, "c1", &a);
        let r2 = build_response(ChallengeType::Crypt1, "c1", &a);
        let r3 = build_response(ChallengeType::Crypt1, "c1", &b);
        assert_eq!(r1, r2);
        assert_ne!(r1, r3);
    }
}
