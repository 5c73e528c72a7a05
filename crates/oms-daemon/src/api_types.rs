//! Request/response DTOs for the HTTP surface, plus the error envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oms_gate::SchemaFrozenResponse;
use oms_merge::Conflict;
use oms_schemas::{
    Branch, EntityKind, ErrorKind, Lock, LockScope, LockType, SchemaEntity, ShadowIndex,
};

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// Uniform error body: kind + message + correlation id. The 423 freeze
/// rejection carries its own richer payload instead.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub correlation_id: Uuid,
    /// Present on CONFLICT responses so the caller can retry with it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i64>,
}

/// Handler-level error that knows its HTTP mapping.
#[derive(Debug)]
pub enum ApiError {
    Kind {
        kind: ErrorKind,
        message: String,
        current_version: Option<i64>,
    },
    Frozen(SchemaFrozenResponse),
    MergeBlocked {
        status: &'static str,
        conflicts: Vec<Conflict>,
    },
}

impl ApiError {
    pub fn kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiError::Kind {
            kind,
            message: message.into(),
            current_version: None,
        }
    }

    pub fn conflict_with_version(message: impl Into<String>, version: Option<i64>) -> Self {
        ApiError::Kind {
            kind: ErrorKind::Conflict,
            message: message.into(),
            current_version: version,
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Locked => StatusCode::LOCKED,
        ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Exhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Kind {
                kind,
                message,
                current_version,
            } => {
                let correlation_id = Uuid::new_v4();
                // INTERNAL details stay in the log; the client gets the id.
                let client_message = if kind == ErrorKind::Internal {
                    tracing::error!(correlation_id = %correlation_id, error = %message, "internal error");
                    format!("internal error (correlation id {correlation_id})")
                } else {
                    message
                };
                (
                    status_for(kind),
                    Json(ErrorResponse {
                        error: kind,
                        message: client_message,
                        correlation_id,
                        current_version,
                    }),
                )
                    .into_response()
            }
            ApiError::Frozen(payload) => (StatusCode::LOCKED, Json(payload)).into_response(),
            ApiError::MergeBlocked { status, conflicts } => (
                StatusCode::PRECONDITION_FAILED,
                Json(serde_json::json!({ "status": status, "conflicts": conflicts })),
            )
                .into_response(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health / status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_uptime_secs: u64,
    pub db_ok: bool,
    pub config_hash: String,
    pub outbox_pending: i64,
    pub outbox_failed: i64,
    pub dead_letters: i64,
    pub active_locks: usize,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityResponse {
    pub entity: SchemaEntity,
    pub version: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EntityListResponse {
    pub branch: String,
    pub kind: EntityKind,
    pub entities: Vec<EntityResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutEntityRequest {
    pub entity: SchemaEntity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutEntityResponse {
    pub rid: Uuid,
    pub version: i64,
    pub created: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub cascade: bool,
}

// ---------------------------------------------------------------------------
// Branches / merge
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BranchResponse {
    pub branch: Branch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeRequest {
    pub changeset_id: Uuid,
    #[serde(default = "default_true")]
    pub auto_resolve: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeResponse {
    pub status: String,
    pub result_hash: String,
    pub conflicts: Vec<Conflict>,
    pub merged_entities: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChangeSetRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub mutations: Vec<oms_schemas::EntityMutation>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChangeSetResponse {
    pub id: Uuid,
    pub state: String,
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct LockListResponse {
    pub locks: Vec<Lock>,
}

#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    pub branch: String,
    pub scope: LockScope,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub lock_type: LockType,
    #[serde(default)]
    pub timeout_s: i64,
    pub ttl_s: i64,
    pub heartbeat_interval_s: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub lock: Lock,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub source: String,
    pub progress_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub extension_s: i64,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ForceUnlockRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LockForIndexingRequest {
    pub resource_types: Option<Vec<String>>,
    #[serde(default)]
    pub force_branch_lock: bool,
}

#[derive(Debug, Deserialize)]
pub struct CompleteIndexingRequest {
    pub resource_types: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LocksAcquiredResponse {
    pub locks: Vec<Lock>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleasedResponse {
    pub released: usize,
}

// ---------------------------------------------------------------------------
// Shadow indexing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartShadowRequest {
    pub branch: String,
    pub index_type: String,
    pub resource_types: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShadowResponse {
    pub shadow: ShadowIndex,
}

#[derive(Debug, Deserialize)]
pub struct ShadowProgressRequest {
    pub progress_pct: f64,
    pub estimated_completion_s: Option<i64>,
    pub record_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ShadowCompleteRequest {
    pub size_bytes: i64,
    pub record_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShadowSwitchRequest {
    #[serde(default)]
    pub backup_current: Option<bool>,
    #[serde(default)]
    pub switch_timeout_s: Option<i64>,
    #[serde(default)]
    pub force_switch: bool,
}

#[derive(Debug, Deserialize)]
pub struct ShadowCancelRequest {
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Compaction (admin)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CompactionRequest {
    pub commits: Vec<oms_merge::Commit>,
}

#[derive(Debug, Serialize)]
pub struct CompactionResponse {
    pub segments: Vec<oms_merge::CompactedSegment>,
    pub surviving_commits: usize,
}
