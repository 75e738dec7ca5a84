//! # guichet-server
//!
//! API server for the Guichet messaging dashboard.
//!
//! This binary provides:
//! - **REST API** (axum) for auth, organizations, contacts, lists,
//!   conversations, templates, campaigns, workflows and tasks
//! - **SSE event streams**, one per organization, that keep connected
//!   dashboards in sync
//! - **Background dispatcher** that launches due campaigns and advances
//!   workflow enrollments on a fixed tick
//! - **Per-IP rate limiting** with a stricter bucket on the credential
//!   endpoints

mod api;
mod auth;
mod config;
mod dispatcher;
mod error;
mod outbound;
mod permissions;
mod rate_limit;
mod realtime;
mod routes;
mod senders;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guichet_store::Database;

use crate::api::AppState;
use crate::auth::ServerKeys;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::rate_limit::RateLimiter;
use crate::realtime::EventHub;
use crate::senders::SenderSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,guichet_server=debug")),
        )
        .init();

    info!("Starting Guichet server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        registration_open = config.registration_open,
        tick_secs = config.dispatch_tick_secs,
        "Self-hosted instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Database (creates the file and runs migrations if missing)
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(db));

    // Token signing keys
    let keys = match config.session_signing_key {
        Some(seed) => Arc::new(ServerKeys::from_seed(seed)),
        None => {
            warn!("SESSION_SIGNING_KEY not set; sessions will not survive a restart");
            Arc::new(ServerKeys::ephemeral())
        }
    };

    // Realtime fan-out and channel providers
    let hub = EventHub::new();
    let senders = SenderSet::sandbox();

    // Rate limiters: a general bucket plus a stricter one for credentials
    let rate_limiter = RateLimiter::general();
    let credential_limiter = RateLimiter::credentials();

    // Dispatch channel: routes nudge the dispatcher through this
    let (dispatch_tx, dispatch_rx) = mpsc::channel(64);

    let app_state = AppState {
        db: db.clone(),
        keys,
        hub: hub.clone(),
        senders: senders.clone(),
        dispatch: dispatch_tx,
        rate_limiter: rate_limiter.clone(),
        credential_limiter: credential_limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    let cl = credential_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
            cl.purge_stale(600.0).await;
        }
    });

    // Periodic event hub cleanup (every 10 minutes, drop channels nobody reads)
    let idle_hub = hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            idle_hub.purge_idle().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Spawn the dispatcher (runs in background tokio task)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;

    Dispatcher::new(db, hub, senders).spawn(config.dispatch_tick_secs, dispatch_rx);
    info!(
        tick_secs = config.dispatch_tick_secs,
        "Dispatcher running in background"
    );

    // -----------------------------------------------------------------------
    // 6. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
