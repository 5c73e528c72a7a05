//! oms-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects the
//! store, builds the shared state, starts the background workers
//! (sweepers + outbox dispatcher), wires middleware, and serves HTTP.
//! All route handlers live in `routes.rs`; shared state in `state.rs`.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use oms_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file
    // does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = oms_config::CoreConfig::from_env().context("invalid configuration")?;

    // Boot is fail-closed: no serving until the store is reachable and
    // migrated.
    let pool = oms_db::connect_from_env().await?;
    oms_db::migrate(&pool).await?;

    let policy_paths = policy_paths_from_env();
    let policy = oms_config::load_policy_files(
        &policy_paths.iter().map(String::as_str).collect::<Vec<_>>(),
    )
    .context("policy files failed to load")?;
    info!(config_hash = %policy.config_hash, "policy loaded");

    let index_root = std::env::var("OMS_INDEX_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./indexes"));

    let shared = Arc::new(state::AppState::new(
        pool.clone(),
        cfg.clone(),
        index_root,
        policy.config_hash,
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    // Lock sweepers: TTL path (slow cadence) + heartbeat path (fast).
    oms_locks::spawn_ttl_sweeper(shared.locks.clone(), shared.shutdown_rx());
    oms_locks::spawn_heartbeat_sweeper(shared.locks.clone(), shared.shutdown_rx());

    // Outbox dispatcher with the configured transports, plus the audit
    // projector mirroring audit rows onto `audit.activity.v1`.
    let transports = build_transports().await;
    let dispatcher = oms_outbox::Dispatcher::new(pool.clone(), transports, cfg.outbox.clone());
    oms_outbox::spawn_dispatcher(dispatcher, Duration::from_secs(1), shared.shutdown_rx());
    oms_outbox::spawn_audit_projector(pool, Duration::from_secs(2), shared.shutdown_rx());

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8610)));
    info!("oms-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&shared)))
        .await
        .context("server crashed")?;

    Ok(())
}

async fn shutdown_signal(shared: Arc<state::AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shared.shutdown.send(true);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("OMS_DAEMON_ADDR").ok()?.parse().ok()
}

fn policy_paths_from_env() -> Vec<String> {
    std::env::var("OMS_POLICY_FILES")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Configured transports: NATS when `NATS_URL` is set, otherwise the
/// in-memory transport (local dev keeps the dispatcher loop honest).
async fn build_transports() -> Vec<std::sync::Arc<dyn oms_outbox::Transport>> {
    match std::env::var("NATS_URL") {
        Ok(url) => match oms_outbox::NatsTransport::connect(&url, "oms").await {
            Ok(t) => {
                info!(url = %url, "nats transport connected");
                vec![std::sync::Arc::new(t)]
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "nats connect failed; events stay pending until restart");
                Vec::new()
            }
        },
        Err(_) => {
            info!("NATS_URL unset; using in-memory transport");
            vec![std::sync::Arc::new(oms_outbox::InMemoryTransport::new())]
        }
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
