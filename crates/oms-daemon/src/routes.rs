//! Axum router and all HTTP handlers for oms-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. All handlers are `pub(crate)` so the
//! scenario tests in `tests/` can compose the router directly.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    routing::post,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use oms_schemas::{EntityKind, ErrorKind};
use oms_shadow::{ShadowError, SwitchRequest};

use crate::api_types::*;
use crate::auth::{authenticate, authorize};
use crate::commands::{self, lock_err, store_err};
use crate::state::{uptime_secs, BusMsg, SharedState};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        // Branches
        .route("/v1/branches", post(branch_create))
        .route("/v1/branches/:branch", get(branch_get))
        .route("/v1/branches/:branch/archive", post(branch_archive))
        .route("/v1/branches/:branch/merge", post(branch_merge))
        // Changesets
        .route("/v1/changesets", post(changeset_create))
        .route("/v1/changesets/:id/approve", post(changeset_approve))
        // Entities
        .route("/v1/branches/:branch/entities/:kind", get(entity_list))
        .route(
            "/v1/branches/:branch/entities/:kind/:rid",
            get(entity_get).put(entity_put).delete(entity_delete),
        )
        // Lock admin
        .route("/v1/locks", get(locks_list))
        .route("/v1/locks/acquire", post(lock_acquire))
        .route("/v1/locks/:id/release", post(lock_release))
        .route("/v1/locks/:id/heartbeat", post(lock_heartbeat))
        .route("/v1/locks/:id/extend", post(lock_extend))
        .route("/v1/branches/:branch/force-unlock", post(force_unlock))
        .route("/v1/branches/:branch/lock-for-indexing", post(lock_for_indexing))
        .route("/v1/branches/:branch/complete-indexing", post(complete_indexing))
        // Shadow indexing lifecycle
        .route("/v1/indexing/shadow", post(shadow_start))
        .route("/v1/indexing/shadow/:id", get(shadow_status))
        .route("/v1/indexing/shadow/:id/progress", post(shadow_progress))
        .route("/v1/indexing/shadow/:id/complete", post(shadow_complete))
        .route("/v1/indexing/shadow/:id/switch", post(shadow_switch))
        .route("/v1/indexing/shadow/:id/cancel", post(shadow_cancel))
        // Admin
        .route("/v1/admin/compaction", post(compaction_run))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health / status / stream
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<SharedState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn status_handler(State(st): State<SharedState>) -> Result<Response, ApiError> {
    let db = oms_db::status(&st.pool)
        .await
        .map_err(|e| ApiError::kind(ErrorKind::Unavailable, format!("{e:#}")))?;
    let outbox = oms_db::outbox_stats(&st.pool).await.map_err(store_err)?;
    let locks = oms_db::locks_all(&st.pool).await.map_err(store_err)?;

    Ok((
        StatusCode::OK,
        Json(StatusResponse {
            daemon_uptime_secs: uptime_secs(),
            db_ok: db.ok && db.has_core_schema,
            config_hash: st.config_hash.clone(),
            outbox_pending: outbox.pending,
            outbox_failed: outbox.failed,
            dead_letters: outbox.dead_letters,
            active_locks: locks.len(),
        }),
    )
        .into_response())
}

pub(crate) async fn stream(State(st): State<SharedState>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Event { .. } => "event",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

pub(crate) async fn branch_create(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<CreateBranchRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "branch.create")?;
    if body.name.is_empty() {
        return Err(ApiError::kind(ErrorKind::InvalidArgument, "branch name is empty"));
    }
    let branch = commands::create_branch(&st, &ctx, &body.name).await?;
    Ok((StatusCode::CREATED, Json(BranchResponse { branch })).into_response())
}

pub(crate) async fn branch_get(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "branch.read")?;
    let branch = oms_db::branch_get(&st.pool, &branch).await.map_err(store_err)?;
    Ok((StatusCode::OK, Json(BranchResponse { branch })).into_response())
}

pub(crate) async fn branch_archive(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "branch.archive")?;
    let branch = commands::archive_branch(&st, &ctx, &branch).await?;
    Ok((StatusCode::OK, Json(BranchResponse { branch })).into_response())
}

pub(crate) async fn branch_merge(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    Json(body): Json<MergeRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "branch.merge")?;
    let result =
        commands::merge_changeset(&st, &ctx, &branch, body.changeset_id, body.auto_resolve).await?;
    Ok((
        StatusCode::OK,
        Json(MergeResponse {
            status: "success".to_string(),
            result_hash: result.result_hash,
            merged_entities: result.merged.len(),
            conflicts: result.conflicts,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

pub(crate) async fn changeset_create(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<CreateChangeSetRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "branch.merge")?;
    let cs = commands::create_changeset(
        &st,
        &ctx,
        &body.source_branch,
        &body.target_branch,
        body.mutations,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(ChangeSetResponse {
            id: cs.id,
            state: cs.state.as_str().to_string(),
        }),
    )
        .into_response())
}

pub(crate) async fn changeset_approve(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "proposal.approve")?;
    let cs = commands::approve_changeset(&st, &ctx, id).await?;
    Ok((
        StatusCode::OK,
        Json(ChangeSetResponse {
            id: cs.id,
            state: cs.state.as_str().to_string(),
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    EntityKind::parse(kind).map_err(|e| ApiError::kind(ErrorKind::InvalidArgument, e))
}

fn if_match_version(headers: &HeaderMap) -> Result<Option<i64>, ApiError> {
    match headers.get(axum::http::header::IF_MATCH) {
        None => Ok(None),
        Some(v) => {
            let raw = v
                .to_str()
                .map_err(|_| ApiError::kind(ErrorKind::InvalidArgument, "unreadable If-Match"))?
                .trim_matches('"');
            raw.parse::<i64>().map(Some).map_err(|_| {
                ApiError::kind(
                    ErrorKind::InvalidArgument,
                    format!("If-Match must be a version integer, got '{raw}'"),
                )
            })
        }
    }
}

pub(crate) async fn entity_list(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path((branch, kind)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "schema.read")?;
    let kind = parse_kind(&kind)?;
    let rows = oms_db::entity_list_kind(&st.pool, &branch, kind)
        .await
        .map_err(store_err)?;
    Ok((
        StatusCode::OK,
        Json(EntityListResponse {
            branch,
            kind,
            entities: rows
                .into_iter()
                .map(|r| EntityResponse {
                    entity: r.entity,
                    version: r.version,
                })
                .collect(),
        }),
    )
        .into_response())
}

pub(crate) async fn entity_get(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path((branch, kind, rid)): Path<(String, String, Uuid)>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "schema.read")?;
    parse_kind(&kind)?;
    let row = oms_db::entity_get(&st.pool, &branch, rid)
        .await
        .map_err(store_err)?;

    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&format!("\"{}\"", row.version)) {
        headers.insert(axum::http::header::ETAG, v);
    }
    Ok((
        StatusCode::OK,
        headers,
        Json(EntityResponse {
            entity: row.entity,
            version: row.version,
        }),
    )
        .into_response())
}

pub(crate) async fn entity_put(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path((branch, kind, rid)): Path<(String, String, Uuid)>,
    Json(body): Json<PutEntityRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "schema.write")?;
    let kind = parse_kind(&kind)?;

    if body.entity.kind() != kind {
        return Err(ApiError::kind(
            ErrorKind::InvalidArgument,
            format!(
                "route says {}, body carries {}",
                kind.as_str(),
                body.entity.kind().as_str()
            ),
        ));
    }
    if body.entity.rid() != rid {
        return Err(ApiError::kind(
            ErrorKind::InvalidArgument,
            "route rid does not match entity rid",
        ));
    }

    let expected_version = if_match_version(&headers)?;
    let outcome = commands::put_entity(&st, &ctx, &branch, body.entity, expected_version).await?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(PutEntityResponse {
            rid: outcome.rid,
            version: outcome.version,
            created: outcome.created,
        }),
    )
        .into_response())
}

pub(crate) async fn entity_delete(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path((branch, kind, rid)): Path<(String, String, Uuid)>,
    Query(params): Query<DeleteParams>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "schema.delete")?;
    let kind = parse_kind(&kind)?;

    let Some(expected_version) = if_match_version(&headers)? else {
        return Err(ApiError::kind(
            ErrorKind::InvalidArgument,
            "delete requires If-Match: <version>",
        ));
    };

    commands::delete_entity(&st, &ctx, &branch, kind, rid, expected_version, params.cascade)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ---------------------------------------------------------------------------
// Lock admin
// ---------------------------------------------------------------------------

pub(crate) async fn locks_list(
    State(st): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.list")?;
    let locks = oms_db::locks_all(&st.pool).await.map_err(store_err)?;
    Ok((StatusCode::OK, Json(LockListResponse { locks })).into_response())
}

pub(crate) async fn lock_acquire(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<AcquireLockRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.heartbeat")?;

    let lock = st
        .locks
        .acquire_lock(oms_locks::AcquireRequest {
            branch: body.branch,
            scope: body.scope,
            resource_type: body.resource_type,
            resource_id: body.resource_id,
            lock_type: body.lock_type,
            holder: ctx.username.clone(),
            timeout: std::time::Duration::from_secs(body.timeout_s.max(0) as u64),
            ttl_s: body.ttl_s,
            heartbeat_interval_s: body.heartbeat_interval_s,
        })
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::CREATED, Json(LockResponse { lock })).into_response())
}

pub(crate) async fn lock_release(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.heartbeat")?;
    let lock = st
        .locks
        .release_lock(id, oms_locks::ReleaseReason::Completed)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::OK, Json(LockResponse { lock })).into_response())
}

pub(crate) async fn lock_heartbeat(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.heartbeat")?;
    let lock = st
        .locks
        .heartbeat(id, &body.source, body.progress_pct)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::OK, Json(LockResponse { lock })).into_response())
}

pub(crate) async fn lock_extend(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ExtendRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.extend")?;
    let lock = st
        .locks
        .extend_ttl(id, body.extension_s, &body.reason)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::OK, Json(LockResponse { lock })).into_response())
}

pub(crate) async fn force_unlock(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    Json(body): Json<ForceUnlockRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "lock.force_unlock")?;
    let released = st
        .locks
        .force_unlock(&branch, &body.reason, &ctx.username, true)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::OK, Json(ReleasedResponse { released })).into_response())
}

pub(crate) async fn lock_for_indexing(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    Json(body): Json<LockForIndexingRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.start")?;
    let locks = st
        .locks
        .lock_for_indexing(&branch, body.resource_types, body.force_branch_lock, &ctx.username)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::CREATED, Json(LocksAcquiredResponse { locks })).into_response())
}

pub(crate) async fn complete_indexing(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(branch): Path<String>,
    Json(body): Json<CompleteIndexingRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.complete")?;
    let released = st
        .locks
        .complete_indexing(&branch, body.resource_types)
        .await
        .map_err(lock_err)?;
    Ok((StatusCode::OK, Json(ReleasedResponse { released })).into_response())
}

// ---------------------------------------------------------------------------
// Shadow indexing
// ---------------------------------------------------------------------------

fn shadow_err(e: ShadowError) -> ApiError {
    match e {
        ShadowError::NotFound(m) => ApiError::kind(ErrorKind::NotFound, m),
        ShadowError::Conflict(m) => ApiError::kind(ErrorKind::Conflict, m),
        ShadowError::IllegalState(m) => ApiError::kind(ErrorKind::PreconditionFailed, m),
        ShadowError::Unavailable(m) => ApiError::kind(ErrorKind::Unavailable, m),
        ShadowError::Locked(m) => ApiError::kind(ErrorKind::Locked, m),
        ShadowError::Internal(m) => ApiError::kind(ErrorKind::Internal, m),
    }
}

pub(crate) async fn shadow_start(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<StartShadowRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.start")?;
    let shadow = st
        .shadow
        .start_shadow_build(&body.branch, &body.index_type, body.resource_types)
        .await
        .map_err(shadow_err)?;
    Ok((StatusCode::CREATED, Json(ShadowResponse { shadow })).into_response())
}

pub(crate) async fn shadow_status(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.status")?;
    let shadow = oms_db::shadow_get(&st.pool, id).await.map_err(store_err)?;
    Ok((StatusCode::OK, Json(ShadowResponse { shadow })).into_response())
}

pub(crate) async fn shadow_progress(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ShadowProgressRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.progress")?;
    let shadow = st
        .shadow
        .update_progress(id, body.progress_pct, body.estimated_completion_s, body.record_count)
        .await
        .map_err(shadow_err)?;
    Ok((StatusCode::OK, Json(ShadowResponse { shadow })).into_response())
}

pub(crate) async fn shadow_complete(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ShadowCompleteRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.complete")?;
    let shadow = st
        .shadow
        .complete_shadow_build(id, body.size_bytes, body.record_count)
        .await
        .map_err(shadow_err)?;
    Ok((StatusCode::OK, Json(ShadowResponse { shadow })).into_response())
}

pub(crate) async fn shadow_switch(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ShadowSwitchRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.switch")?;

    let mut req = SwitchRequest::defaults(&st.cfg.shadow);
    if let Some(backup) = body.backup_current {
        req.backup_current = backup;
    }
    if let Some(timeout) = body.switch_timeout_s {
        req.switch_timeout_s = timeout;
    }
    req.force_switch = body.force_switch;

    let result = st.shadow.request_atomic_switch(id, req).await.map_err(shadow_err)?;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::PRECONDITION_FAILED
    };
    Ok((status, Json(result)).into_response())
}

pub(crate) async fn shadow_cancel(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ShadowCancelRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "indexing.cancel")?;
    let shadow = st
        .shadow
        .cancel_shadow_build(id, &body.reason)
        .await
        .map_err(shadow_err)?;
    Ok((StatusCode::OK, Json(ShadowResponse { shadow })).into_response())
}

// ---------------------------------------------------------------------------
// Admin: DAG compaction
// ---------------------------------------------------------------------------

pub(crate) async fn compaction_run(
    State(st): State<SharedState>,
    headers: HeaderMap,
    Json(body): Json<CompactionRequest>,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&st, &headers).await?;
    authorize(&st, &ctx, "compaction.run")?;

    let result = oms_merge::compact(&body.commits);
    Ok((
        StatusCode::OK,
        Json(CompactionResponse {
            surviving_commits: result.commits.len(),
            segments: result.segments,
        }),
    )
        .into_response())
}
