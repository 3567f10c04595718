// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;

/// The closed vocabulary of `problem` tokens carried on `close` control
/// messages and `closed` transport events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    ProtocolError,
    NotSupported,
    NotFound,
    AccessDenied,
    AuthenticationFailed,
    Disconnected,
    Terminated,
    Timeout,
    InternalError,
    NoCockpit,
    NoSession,
}

impl Problem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProtocolError => "protocol-error",
            Self::NotSupported => "not-supported",
            Self::NotFound => "not-found",
            Self::AccessDenied => "access-denied",
            Self::AuthenticationFailed => "authentication-failed",
            Self::Disconnected => "disconnected",
            Self::Terminated => "terminated",
            Self::Timeout => "timeout",
            Self::InternalError => "internal-error",
            Self::NoCockpit => "no-cockpit",
            Self::NoSession => "no-session",
        }
    }

    /// Map a resource-serving problem to its HTTP status, per §4.5.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::NotSupported => StatusCode::NOT_FOUND,
            Self::AccessDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether an I/O error surfacing this problem should be logged at
    /// debug level rather than warn/error (§7 suppression rule).
    pub fn is_routine_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Parse a wire-level `problem` token back into its enum variant.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "protocol-error" => Self::ProtocolError,
            "not-supported" => Self::NotSupported,
            "not-found" => Self::NotFound,
            "access-denied" => Self::AccessDenied,
            "authentication-failed" => Self::AuthenticationFailed,
            "disconnected" => Self::Disconnected,
            "terminated" => Self::Terminated,
            "timeout" => Self::Timeout,
            "internal-error" => Self::InternalError,
            "no-cockpit" => Self::NoCockpit,
            "no-session" => Self::NoSession,
            _ => return None,
        })
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<std::io::Error> for Problem {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
                Self::Disconnected
            }
            ErrorKind::TimedOut => Self::Timeout,
            ErrorKind::NotFound => Self::NoCockpit,
            _ => Self::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        not_found = { Problem::NotFound, StatusCode::NOT_FOUND },
        not_supported = { Problem::NotSupported, StatusCode::NOT_FOUND },
        access_denied = { Problem::AccessDenied, StatusCode::FORBIDDEN },
        internal_error = { Problem::InternalError, StatusCode::INTERNAL_SERVER_ERROR },
        disconnected = { Problem::Disconnected, StatusCode::INTERNAL_SERVER_ERROR },
    )]
    fn http_status_maps_resource_problems(problem: Problem, expected: StatusCode) {
        assert_eq!(problem.http_status(), expected);
    }

    #[test]
    fn from_token_roundtrips_as_str() {
        for p in [
            Problem::ProtocolError,
            Problem::NotSupported,
            Problem::NotFound,
            Problem::AccessDenied,
            Problem::AuthenticationFailed,
            Problem::Disconnected,
            Problem::Terminated,
            Problem::Timeout,
            Problem::InternalError,
            Problem::NoCockpit,
            Problem::NoSession,
        ] {
            assert_eq!(Problem::from_token(p.as_str()), Some(p));
        }
        assert_eq!(Problem::from_token("made-up"), None);
    }
}
