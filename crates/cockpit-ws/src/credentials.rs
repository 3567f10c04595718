// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Opaque, mostly-immutable credential handle. Construction is the
//! responsibility of the (out-of-scope) auth subsystem; the router only
//! reads identity fields and, once, poisons the password.

use parking_lot::Mutex;
use serde::Serialize;
use zeroize::Zeroizing;

/// The bridge's declared superuser descriptor, carried verbatim in the
/// router's own `init` reply when present.
#[derive(Debug, Clone, Serialize)]
pub struct SuperuserDescriptor {
    pub id: String,
}

/// Pre-authenticated credentials threaded into a router at construction.
///
/// Everything but the password is immutable for the handle's lifetime.
/// The password is cleared exactly once via [`Credentials::poison`]; after
/// that the handle remains usable for identity (`user`, `rhost`) but never
/// again yields password bytes.
pub struct Credentials {
    user: String,
    rhost: String,
    csrf_token: String,
    superuser: Option<SuperuserDescriptor>,
    password: Mutex<Option<Zeroizing<Vec<u8>>>>,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        password: Vec<u8>,
        rhost: impl Into<String>,
        csrf_token: impl Into<String>,
        superuser: Option<SuperuserDescriptor>,
    ) -> Self {
        Self {
            user: user.into(),
            rhost: rhost.into(),
            csrf_token: csrf_token.into(),
            superuser,
            password: Mutex::new(Some(Zeroizing::new(password))),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn rhost(&self) -> &str {
        &self.rhost
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn superuser(&self) -> Option<&SuperuserDescriptor> {
        self.superuser.as_ref()
    }

    /// A snapshot of the password bytes, or `None` once poisoned.
    pub fn password(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.password.lock().clone()
    }

    pub fn is_poisoned(&self) -> bool {
        self.password.lock().is_none()
    }

    /// Securely erase the password. Safe to call more than once; only the
    /// first call has an effect. Identity fields remain usable afterwards.
    pub fn poison(&self) {
        self.password.lock().take();
    }

    /// Replace the password with one supplied in-session (an `authorize`
    /// "basic" response updating credentials). The old bytes are dropped
    /// and zeroed as usual; a poisoned handle can be un-poisoned this way.
    pub fn replace_password(&self, new_password: Vec<u8>) {
        *self.password.lock() = Some(Zeroizing::new(new_password));
    }
}
