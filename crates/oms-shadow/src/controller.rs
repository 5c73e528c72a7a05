//! Shadow-index controller.
//!
//! Owns the lifecycle rows and coordinates the three parties: the external
//! indexer (reports progress and completion), the lock manager (short
//! switch window at RESOURCE_TYPE scope), and the filesystem switch.
//!
//! Writes unrelated to the shadow's `(branch, resource_types)` keep
//! flowing through the whole PREPARING..BUILT phase; only the switch
//! window blocks, and it is bounded by `SHADOW_SWITCH_TIMEOUT_S`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use oms_config::{CircuitBreakerConfig, ShadowConfig};
use oms_db::{outbox::NewOutboxEvent, StoreError};
use oms_locks::{LockError, LockManager, ReleaseReason};
use oms_schemas::{subjects, EventEnvelope, ShadowIndex, ShadowState, SwitchStrategy};

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::machine::{apply, ShadowEvent};
use crate::switch::{perform_switch, SwitchOptions, SwitchResult};

pub const EVENT_SOURCE: &str = "/oms/shadow";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ShadowError {
    NotFound(String),
    /// A non-terminal shadow already occupies the `(branch, index_type)`
    /// slot, or a guarded update lost a race.
    Conflict(String),
    /// The requested operation is illegal in the current lifecycle state.
    IllegalState(String),
    /// Indexer connection breaker is open, or the store is down.
    Unavailable(String),
    Locked(String),
    Internal(String),
}

impl std::fmt::Display for ShadowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShadowError::NotFound(m) => write!(f, "shadow not found: {m}"),
            ShadowError::Conflict(m) => write!(f, "shadow conflict: {m}"),
            ShadowError::IllegalState(m) => write!(f, "illegal shadow state: {m}"),
            ShadowError::Unavailable(m) => write!(f, "shadow controller unavailable: {m}"),
            ShadowError::Locked(m) => write!(f, "switch lock refused: {m}"),
            ShadowError::Internal(m) => write!(f, "shadow controller internal error: {m}"),
        }
    }
}

impl std::error::Error for ShadowError {}

impl From<StoreError> for ShadowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { what } => ShadowError::NotFound(what),
            StoreError::Conflict { detail, .. } => ShadowError::Conflict(detail),
            StoreError::Timeout => ShadowError::Unavailable("store timeout".to_string()),
            StoreError::Unavailable(m) => ShadowError::Unavailable(m),
            StoreError::Internal(m) => ShadowError::Internal(m),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SwitchRequest {
    pub backup_current: bool,
    pub switch_timeout_s: i64,
    pub force_switch: bool,
    pub strategy: SwitchStrategy,
}

impl SwitchRequest {
    pub fn defaults(cfg: &ShadowConfig) -> Self {
        Self {
            backup_current: cfg.backup_before_switch,
            switch_timeout_s: cfg.switch_timeout_s,
            force_switch: false,
            strategy: SwitchStrategy::AtomicRename,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ShadowController {
    pool: PgPool,
    locks: LockManager,
    cfg: ShadowConfig,
    index_root: PathBuf,
    breaker: Arc<Mutex<CircuitBreaker>>,
}

impl ShadowController {
    pub fn new(
        pool: PgPool,
        locks: LockManager,
        cfg: ShadowConfig,
        breaker_cfg: CircuitBreakerConfig,
        index_root: PathBuf,
    ) -> Self {
        Self {
            pool,
            locks,
            cfg,
            index_root,
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(breaker_cfg))),
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().map(|b| b.state()).unwrap_or(BreakerState::Open)
    }

    fn breaker_allow(&self) -> bool {
        self.breaker
            .lock()
            .map(|mut b| b.allow(Utc::now()))
            .unwrap_or(false)
    }

    fn breaker_success(&self) {
        if let Ok(mut b) = self.breaker.lock() {
            b.record_success();
        }
    }

    fn breaker_failure(&self) {
        if let Ok(mut b) = self.breaker.lock() {
            b.record_failure(Utc::now());
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle operations
    // -----------------------------------------------------------------------

    /// Allocate a shadow build. Does NOT take a branch write lock: writes
    /// keep flowing while the indexer builds out-of-band.
    pub async fn start_shadow_build(
        &self,
        branch: &str,
        index_type: &str,
        resource_types: Vec<String>,
    ) -> Result<ShadowIndex, ShadowError> {
        if !self.breaker_allow() {
            return Err(ShadowError::Unavailable(
                "indexer circuit breaker is open".to_string(),
            ));
        }

        if let Some(existing) =
            oms_db::shadow_non_terminal_for(&self.pool, branch, index_type).await?
        {
            return Err(ShadowError::Conflict(format!(
                "shadow {} is already {} for ({branch}, {index_type})",
                existing.id,
                existing.state.as_str()
            )));
        }

        let id = Uuid::new_v4();
        let shadow = ShadowIndex {
            id,
            branch: branch.to_string(),
            index_type: index_type.to_string(),
            resource_types,
            state: ShadowState::Preparing,
            progress_pct: 0.0,
            estimated_completion_s: None,
            record_count: None,
            size_bytes: None,
            build_started_at_utc: Utc::now(),
            build_completed_at_utc: None,
            current_path: Some(self.current_path(branch, index_type).display().to_string()),
            shadow_path: self.shadow_path(branch, index_type, id).display().to_string(),
        };

        oms_db::shadow_insert(&self.pool, &shadow).await?;
        self.emit(subjects::INDEXING_STARTED, &shadow, json!({ "phase": "build" }))
            .await?;

        info!(shadow_id = %id, branch = %branch, index_type = %index_type, "shadow build started");
        Ok(shadow)
    }

    /// Progress report from the indexer. The first report moves
    /// PREPARING → BUILDING.
    pub async fn update_progress(
        &self,
        shadow_id: Uuid,
        progress_pct: f64,
        estimated_completion_s: Option<i64>,
        record_count: Option<i64>,
    ) -> Result<ShadowIndex, ShadowError> {
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;

        if shadow.state == ShadowState::Preparing {
            self.transition(&shadow, ShadowEvent::BuildStarted).await?;
        } else if shadow.state != ShadowState::Building {
            return Err(ShadowError::IllegalState(format!(
                "progress reported while {}",
                shadow.state.as_str()
            )));
        }

        oms_db::shadow_update_progress(
            &self.pool,
            shadow_id,
            progress_pct,
            estimated_completion_s,
            record_count,
        )
        .await?;

        oms_db::shadow_get(&self.pool, shadow_id).await.map_err(Into::into)
    }

    /// Completion report: BUILDING → BUILT.
    pub async fn complete_shadow_build(
        &self,
        shadow_id: Uuid,
        size_bytes: i64,
        record_count: i64,
    ) -> Result<ShadowIndex, ShadowError> {
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;

        // A completion racing a cancel resolves through the guarded update.
        apply(shadow.state, ShadowEvent::BuildCompleted)
            .map_err(|e| ShadowError::IllegalState(e.to_string()))?;

        let moved =
            oms_db::shadow_complete_build(&self.pool, shadow_id, size_bytes, record_count, Utc::now())
                .await?;
        if !moved {
            return Err(ShadowError::Conflict(
                "shadow left BUILDING before completion landed".to_string(),
            ));
        }

        self.breaker_success();
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;
        self.emit(
            subjects::INDEXING_COMPLETED,
            &shadow,
            json!({ "phase": "build", "record_count": record_count, "size_bytes": size_bytes }),
        )
        .await?;
        Ok(shadow)
    }

    /// Cancel a build that has not reached BUILT.
    pub async fn cancel_shadow_build(
        &self,
        shadow_id: Uuid,
        reason: &str,
    ) -> Result<ShadowIndex, ShadowError> {
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;
        apply(shadow.state, ShadowEvent::BuildCancelled)
            .map_err(|e| ShadowError::IllegalState(e.to_string()))?;

        let moved =
            oms_db::shadow_set_state(&self.pool, shadow_id, shadow.state, ShadowState::Cancelled)
                .await?;
        if !moved {
            return Err(ShadowError::Conflict(
                "shadow state moved while cancelling".to_string(),
            ));
        }

        warn!(shadow_id = %shadow_id, reason = %reason, "shadow build cancelled");
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;
        self.emit(subjects::INDEXING_FAILED, &shadow, json!({ "cancelled": true, "reason": reason }))
            .await?;
        Ok(shadow)
    }

    // -----------------------------------------------------------------------
    // Atomic switch
    // -----------------------------------------------------------------------

    /// Promote a BUILT shadow under a bounded RESOURCE_TYPE lock window.
    pub async fn request_atomic_switch(
        &self,
        shadow_id: Uuid,
        req: SwitchRequest,
    ) -> Result<SwitchResult, ShadowError> {
        let shadow = oms_db::shadow_get(&self.pool, shadow_id).await?;
        apply(shadow.state, ShadowEvent::SwitchStarted)
            .map_err(|e| ShadowError::IllegalState(e.to_string()))?;

        let timeout_s = req.switch_timeout_s.clamp(1, self.cfg.switch_timeout_s);

        // Take the switch locks first so the state only moves to SWITCHING
        // once the window is actually open.
        let locks = self
            .locks
            .lock_for_indexing(
                &shadow.branch,
                Some(shadow.resource_types.clone()),
                false,
                &format!("shadow-switch:{shadow_id}"),
            )
            .await
            .map_err(|e| match e {
                LockError::Conflict(info) => ShadowError::Locked(format!(
                    "switch lock blocked by {} lock held by '{}'",
                    info.scope.as_str(),
                    info.holder
                )),
                other => ShadowError::Unavailable(other.to_string()),
            })?;

        let moved =
            oms_db::shadow_set_state(&self.pool, shadow_id, ShadowState::Built, ShadowState::Switching)
                .await?;
        if !moved {
            self.release_switch_locks(&locks).await;
            return Err(ShadowError::Conflict(
                "shadow left BUILT before the switch window opened".to_string(),
            ));
        }

        let shadow_path = PathBuf::from(&shadow.shadow_path);
        let current_path = self.current_path(&shadow.branch, &shadow.index_type);
        let opts = SwitchOptions {
            backup_current: req.backup_current,
            switch_timeout_s: timeout_s,
            force_switch: req.force_switch,
            strategy: req.strategy,
            expected_size_bytes: shadow.size_bytes,
            record_count: shadow.record_count,
        };

        if req.force_switch {
            if let Some(n) = shadow.record_count {
                warn!(shadow_id = %shadow_id, record_count = n, "force_switch requested");
            }
        }

        // The rename work is synchronous filesystem IO; keep the runtime
        // responsive while it runs.
        let switch_result = tokio::task::spawn_blocking(move || {
            perform_switch(&shadow_path, &current_path, &opts)
        })
        .await
        .map_err(|e| ShadowError::Internal(format!("switch task join: {e}")))
        .and_then(|r| r.map_err(|e| ShadowError::Internal(format!("{e:#}"))));

        self.release_switch_locks(&locks).await;

        let result = match switch_result {
            Ok(r) => r,
            Err(e) => {
                let _ = oms_db::shadow_set_state(
                    &self.pool,
                    shadow_id,
                    ShadowState::Switching,
                    ShadowState::Failed,
                )
                .await;
                self.breaker_failure();
                let _ = self.locks.mark_branch_error(&shadow.branch, "index switch crashed").await;
                return Err(e);
            }
        };

        if result.success {
            oms_db::shadow_set_state(&self.pool, shadow_id, ShadowState::Switching, ShadowState::Active)
                .await?;
            self.breaker_success();
            self.emit(
                subjects::INDEXING_COMPLETED,
                &shadow,
                json!({ "phase": "switch", "duration_ms": result.switch_duration_ms }),
            )
            .await?;
            info!(
                shadow_id = %shadow_id,
                duration_ms = result.switch_duration_ms,
                "atomic switch complete"
            );
        } else {
            oms_db::shadow_set_state(&self.pool, shadow_id, ShadowState::Switching, ShadowState::Failed)
                .await?;
            self.breaker_failure();
            self.locks
                .mark_branch_error(&shadow.branch, "index switch failed")
                .await
                .map_err(|e| ShadowError::Internal(e.to_string()))?;
            self.emit(
                subjects::INDEXING_FAILED,
                &shadow,
                json!({
                    "phase": "switch",
                    "validation_errors": result.validation_errors,
                    "verification_errors": result.verification_errors,
                }),
            )
            .await?;
            warn!(shadow_id = %shadow_id, "atomic switch failed and rolled back");
        }

        Ok(result)
    }

    async fn release_switch_locks(&self, locks: &[oms_schemas::Lock]) {
        for lock in locks {
            if let Err(e) = self.locks.release_lock(lock.id, ReleaseReason::Completed).await {
                warn!(lock_id = %lock.id, error = %e, "switch lock release failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn transition(
        &self,
        shadow: &ShadowIndex,
        event: ShadowEvent,
    ) -> Result<(), ShadowError> {
        let to = apply(shadow.state, event).map_err(|e| ShadowError::IllegalState(e.to_string()))?;

        let moved = oms_db::shadow_set_state(&self.pool, shadow.id, shadow.state, to).await?;
        if !moved {
            return Err(ShadowError::Conflict(
                "shadow state moved before transition landed".to_string(),
            ));
        }
        Ok(())
    }

    fn current_path(&self, branch: &str, index_type: &str) -> PathBuf {
        self.index_root
            .join(sanitize_segment(branch))
            .join(format!("{index_type}.current"))
    }

    fn shadow_path(&self, branch: &str, index_type: &str, id: Uuid) -> PathBuf {
        self.index_root
            .join(sanitize_segment(branch))
            .join(format!("{index_type}.shadow-{id}"))
    }

    async fn emit(
        &self,
        subject: &str,
        shadow: &ShadowIndex,
        data: serde_json::Value,
    ) -> Result<(), ShadowError> {
        let envelope = EventEnvelope::new(
            format!("com.oms.{subject}"),
            EVENT_SOURCE,
            subject,
            json!({
                "shadow_id": shadow.id,
                "branch": shadow.branch,
                "index_type": shadow.index_type,
                "resource_types": shadow.resource_types,
                "state": shadow.state.as_str(),
                "detail": data,
            }),
            shadow.branch.clone(),
            "shadow-controller",
        );
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| ShadowError::Internal(format!("event encode: {e}")))?;

        let mut tx = oms_db::begin(&self.pool).await?;
        oms_db::outbox_insert(
            &mut tx,
            &NewOutboxEvent {
                event_id: envelope.id,
                event_type: envelope.event_type.clone(),
                subject: subject.to_string(),
                correlation_id: envelope.ce_correlationid,
                idempotency_key: None,
                data: payload,
                max_retries: 3,
            },
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| ShadowError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

/// Branch names contain slashes; keep the on-disk layout flat per branch.
fn sanitize_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_never_nest_on_branch_slashes() {
        assert_eq!(sanitize_segment("feature/x"), "feature_x");
        assert_eq!(sanitize_segment("main"), "main");
    }

    #[test]
    fn switch_request_defaults_follow_config() {
        let cfg = ShadowConfig {
            switch_timeout_s: 10,
            backup_before_switch: true,
        };
        let req = SwitchRequest::defaults(&cfg);
        assert!(req.backup_current);
        assert_eq!(req.switch_timeout_s, 10);
        assert!(!req.force_switch);
        assert_eq!(req.strategy, SwitchStrategy::AtomicRename);
    }
}
