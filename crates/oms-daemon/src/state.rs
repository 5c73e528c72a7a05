//! Shared runtime state for oms-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async
//! itself beyond the broadcast bus.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::{broadcast, watch};

use oms_audit::Sanitizer;
use oms_auth::{PermissionMatrix, TokenValidator};
use oms_config::CoreConfig;
use oms_gate::FreezeGate;
use oms_locks::LockManager;
use oms_shadow::ShadowController;

// ---------------------------------------------------------------------------
// BusMsg — SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE
/// events to subscribed clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    /// A domain event committed to the outbox (subject + event id).
    Event { subject: String, event_id: uuid::Uuid },
    LogLine { level: String, msg: String },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub cfg: CoreConfig,
    pub locks: LockManager,
    pub gate: FreezeGate,
    pub shadow: ShadowController,
    pub sanitizer: Sanitizer,
    pub matrix: PermissionMatrix,
    /// `None` when JWKS_URL is unset; requests then require the explicit
    /// dev escape hatch (`OMS_DEV_ALLOW_ANON=1`) or are refused.
    pub validator: Option<TokenValidator>,
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    /// Canonical hash of the layered policy files, for drift detection.
    pub config_hash: String,
    /// Dev escape hatch (`OMS_DEV_ALLOW_ANON=1`), read once at boot:
    /// with no JWKS configured, requests run as a full-scope dev identity
    /// instead of being refused.
    pub dev_allow_anon: bool,
    /// Flipped at shutdown; sweepers and the dispatcher watch it.
    pub shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(pool: PgPool, cfg: CoreConfig, index_root: PathBuf, config_hash: String) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let (shutdown, _) = watch::channel(false);

        let locks = LockManager::new(pool.clone(), cfg.locks.clone());
        let gate = FreezeGate::new(locks.clone());
        let shadow = ShadowController::new(
            pool.clone(),
            locks.clone(),
            cfg.shadow.clone(),
            cfg.circuit_breaker.clone(),
            index_root,
        );
        let sanitizer = Sanitizer::new(&cfg.pii, Vec::new());
        let validator = cfg
            .auth
            .jwks_url
            .as_ref()
            .and_then(|_| TokenValidator::new(cfg.auth.clone()).ok());

        Self {
            pool,
            cfg,
            locks,
            gate,
            shadow,
            sanitizer,
            matrix: PermissionMatrix::default(),
            validator,
            bus,
            build: BuildInfo {
                service: "oms-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
            dev_allow_anon: std::env::var("OMS_DEV_ALLOW_ANON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            shutdown,
        }
    }

    /// Test hook: override the dev escape hatch without touching the
    /// process environment (env mutation races across parallel tests).
    pub fn with_dev_anon(mut self, allow: bool) -> Self {
        self.dev_allow_anon = allow;
        self
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Arc convenience used by main and the router tests.
pub type SharedState = Arc<AppState>;
