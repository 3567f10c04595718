// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the cockpit-ws multiplex engine.
#[derive(Debug, Clone, clap::Parser)]
pub struct CockpitConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "COCKPIT_WS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9090, env = "COCKPIT_WS_PORT")]
    pub port: u16,

    /// Bridge command to spawn per session (run via `sh -c`).
    #[arg(long, default_value = "cockpit-bridge", env = "COCKPIT_WS_BRIDGE")]
    pub bridge_command: String,

    /// Ping interval for live sockets, in seconds (§4.4.5).
    #[arg(long, default_value_t = 5, env = "COCKPIT_WS_PING_INTERVAL_SECS")]
    pub ping_interval_secs: u64,

    /// Legacy credential-poison delay when the bridge lacks
    /// `explicit-superuser`, in seconds (§4.4.1).
    #[arg(long, default_value_t = 120, env = "COCKPIT_WS_POISON_DELAY_SECS")]
    pub poison_delay_secs: u64,

    /// Grace period after the last socket departs before an idling router
    /// is destroyed, in seconds (§4.4.5).
    #[arg(long, default_value_t = 10, env = "COCKPIT_WS_IDLE_GRACE_SECS")]
    pub idle_grace_secs: u64,

    /// Back-pressure high-water mark in bytes (§5).
    #[arg(long, default_value_t = 1_048_576, env = "COCKPIT_WS_PRESSURE_HIGH_WATER_MARK")]
    pub pressure_high_water_mark: usize,

    /// Hard ceiling on a single bridge frame, in bytes (§4.2 failure
    /// semantics). Cockpit's own transport uses 256 MiB.
    #[arg(long, default_value_t = 256 * 1024 * 1024, env = "COCKPIT_WS_FRAME_CEILING")]
    pub frame_ceiling: usize,

    /// Hard ceiling on a single control message's JSON body, in bytes
    /// (§8 boundary behaviours).
    #[arg(long, default_value_t = 16 * 1024, env = "COCKPIT_WS_CONTROL_CEILING")]
    pub control_ceiling: usize,

    /// Maximum HTTP request body size for resource requests, in bytes;
    /// requests over 2x this are terminated rather than refused (§8).
    #[arg(long, default_value_t = 4 * 1024 * 1024, env = "COCKPIT_WS_REQUEST_MAXIMUM")]
    pub request_maximum: usize,

    /// Explicit allowed WebSocket origins (repeatable). When empty, the
    /// origin is derived from the `Host` header (§4.3).
    #[arg(long = "allowed-origin", env = "COCKPIT_WS_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Treat the connection as TLS-terminated by an upstream proxy for
    /// the purpose of origin scheme derivation (`wss://`).
    #[arg(long, default_value_t = false, env = "COCKPIT_WS_BEHIND_TLS_PROXY")]
    pub behind_tls_proxy: bool,
}

impl CockpitConfig {
    /// A config with short timers and small limits, for tests that want to
    /// construct one without going through `clap::Parser::parse`.
    #[cfg(any(test, feature = "test-util"))]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 0,
            bridge_command: "true".to_owned(),
            ping_interval_secs: 5,
            poison_delay_secs: 120,
            idle_grace_secs: 10,
            pressure_high_water_mark: 1_048_576,
            frame_ceiling: 256 * 1024 * 1024,
            control_ceiling: 16 * 1024,
            request_maximum: 4 * 1024 * 1024,
            allowed_origins: Vec::new(),
            behind_tls_proxy: false,
        }
    }

    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_secs)
    }

    pub fn poison_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poison_delay_secs)
    }

    pub fn idle_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_grace_secs)
    }
}
