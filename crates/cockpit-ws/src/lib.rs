// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! cockpit-ws: the multiplex protocol engine that fronts a server-management
//! backend. Authenticates nothing itself (§1); it upgrades browsers to the
//! `cockpit1` framed multiplex protocol, spawns or attaches to a per-session
//! bridge subprocess, and relays channels between the two sides.

pub mod channel_response;
pub mod config;
pub mod credentials;
pub mod error;
pub mod frame;
pub mod http;
pub mod router;
pub mod security;
pub mod transport;
pub mod websocket;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CockpitConfig;
use crate::http::AppState;

/// Run the multiplex engine's HTTP listener until Ctrl-C or the listener
/// itself fails. Shutdown is graceful: in-flight WebSocket upgrades and
/// `ChannelResponse` streams are allowed to drain rather than being cut.
pub async fn run(config: CockpitConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(Arc::clone(&config)));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    let router = http::build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("cockpit-ws listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}
