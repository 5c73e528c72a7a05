//! Write-path orchestration.
//!
//! Every state-changing command follows the same transaction discipline:
//!
//! ```text
//! BEGIN → advisory lock on (branch) → read current → write with
//! expected version → outbox insert → audit insert → COMMIT
//! ```
//!
//! so the business change, its event, and its audit record land atomically
//! or not at all.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use oms_auth::UserContext;
use oms_db::{entities::PutOutcome, StoreError};
use oms_gate::Admission;
use oms_locks::LockError;
use oms_merge::{MergeOptions, MergeResult, MergeStatus};
use oms_schemas::{
    subjects, AuditChanges, AuditRecord, Branch, BranchState, ChangeSet, ChangeSetState,
    EntityMutation, MutationOp, SchemaEntity,
};

use crate::api_types::ApiError;
use crate::state::{AppState, BusMsg};

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub fn store_err(e: StoreError) -> ApiError {
    use oms_schemas::ErrorKind::*;
    match e {
        StoreError::Conflict {
            detail,
            current_version,
        } => ApiError::conflict_with_version(detail, current_version),
        StoreError::NotFound { what } => ApiError::kind(NotFound, what),
        StoreError::Timeout => ApiError::kind(Timeout, "store lock acquisition timed out"),
        StoreError::Unavailable(m) => ApiError::kind(Unavailable, m),
        StoreError::Internal(m) => ApiError::kind(Internal, m),
    }
}

pub fn lock_err(e: LockError) -> ApiError {
    use oms_schemas::ErrorKind::*;
    match e {
        LockError::Conflict(info) => ApiError::kind(
            Conflict,
            format!(
                "{} lock held by '{}' until {}",
                info.scope.as_str(),
                info.holder,
                info.expires_at_utc
            ),
        ),
        LockError::Gone => ApiError::kind(NotFound, "lock already released"),
        LockError::Forbidden => ApiError::kind(Forbidden, "privileged lock operation refused"),
        LockError::Timeout => ApiError::kind(Timeout, "lock acquisition timed out"),
        LockError::Unavailable(m) => ApiError::kind(Unavailable, m),
        LockError::Internal(m) => ApiError::kind(Internal, m),
    }
}

fn commit_err(e: sqlx::Error) -> ApiError {
    store_err(StoreError::from(e))
}

// ---------------------------------------------------------------------------
// Entity writes
// ---------------------------------------------------------------------------

/// Archived and errored branches accept no writes; ERROR clears only via
/// force-unlock.
async fn ensure_branch_writable(state: &AppState, branch: &str) -> Result<(), ApiError> {
    let b = oms_db::branch_get(&state.pool, branch).await.map_err(store_err)?;
    match b.state {
        BranchState::Archived | BranchState::Error => Err(ApiError::kind(
            oms_schemas::ErrorKind::PreconditionFailed,
            format!("branch '{branch}' is {} and accepts no writes", b.state.as_str()),
        )),
        _ => Ok(()),
    }
}

pub async fn put_entity(
    state: &AppState,
    ctx: &UserContext,
    branch: &str,
    entity: SchemaEntity,
    expected_version: Option<i64>,
) -> Result<PutOutcome, ApiError> {
    let started = Instant::now();
    let kind = entity.kind();
    let rid = entity.rid();

    ensure_branch_writable(state, branch).await?;

    // Freeze gate next: a frozen resource type refuses before any store
    // work happens.
    match state
        .gate
        .admit(branch, "schema.write", Some(kind.as_str()), Some(&rid.to_string()))
        .await
        .map_err(lock_err)?
    {
        Admission::Proceed => {}
        Admission::Frozen(payload) => return Err(ApiError::Frozen(payload)),
    }

    let before = match expected_version {
        Some(_) => oms_db::entity_get(&state.pool, branch, rid).await.ok(),
        None => None,
    };

    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    oms_db::advisory_lock(
        &mut tx,
        branch_key(branch).as_bytes(),
        Duration::from_secs(state.cfg.locks.default_timeout_s.max(1) as u64),
    )
    .await
    .map_err(store_err)?;

    let outcome = oms_db::entity_put(&mut tx, branch, &entity, expected_version)
        .await
        .map_err(store_err)?;
    oms_db::branch_touch(&mut tx, branch, None, &ctx.username)
        .await
        .map_err(store_err)?;

    let verb = if outcome.created { "created" } else { "updated" };
    let subject = subjects::entity(kind.as_str(), verb);
    let (envelope, outbox_event) = oms_outbox::build_event(
        &state.sanitizer,
        state.cfg.outbox.max_retries,
        oms_outbox::EventInput {
            event_type: format!("com.oms.{subject}"),
            subject: subject.clone(),
            data: serde_json::to_value(&entity)
                .map_err(|e| ApiError::kind(oms_schemas::ErrorKind::Internal, e.to_string()))?,
            branch: branch.to_string(),
            author: ctx.username.clone(),
            correlation_id: None,
            causation_id: None,
            commit: None,
            tenant: ctx.tenant.clone(),
            idempotency_key: Some(format!("{branch}:{}:{rid}:{}", kind.as_str(), outcome.version)),
        },
    )
    .map_err(|e| ApiError::kind(oms_schemas::ErrorKind::InvalidArgument, format!("{e:#}")))?;

    oms_db::outbox_insert(&mut tx, &outbox_event)
        .await
        .map_err(store_err)?;

    let audit = AuditRecord {
        event_id: Uuid::new_v4(),
        action: format!("schema.{verb}"),
        actor_id: ctx.sub.clone(),
        actor_roles: ctx.roles.clone(),
        target_kind: kind.as_str().to_string(),
        target_id: rid.to_string(),
        branch: Some(branch.to_string()),
        success: true,
        error_code: None,
        duration_ms: started.elapsed().as_millis() as i64,
        changes: AuditChanges {
            before: before
                .as_ref()
                .and_then(|b| serde_json::to_value(&b.entity).ok()),
            after: serde_json::to_value(&entity).ok(),
            fields_changed: Vec::new(),
        },
        metadata: json!({ "expected_version": expected_version }),
        time_utc: Utc::now(),
    };
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;

    tx.commit().await.map_err(commit_err)?;

    let _ = state.bus.send(BusMsg::Event {
        subject,
        event_id: envelope.id,
    });
    info!(branch = %branch, kind = kind.as_str(), rid = %rid, verb, "entity written");
    Ok(outcome)
}

pub async fn delete_entity(
    state: &AppState,
    ctx: &UserContext,
    branch: &str,
    kind: oms_schemas::EntityKind,
    rid: Uuid,
    expected_version: i64,
    cascade: bool,
) -> Result<(), ApiError> {
    let started = Instant::now();

    ensure_branch_writable(state, branch).await?;

    match state
        .gate
        .admit(branch, "schema.delete", Some(kind.as_str()), Some(&rid.to_string()))
        .await
        .map_err(lock_err)?
    {
        Admission::Proceed => {}
        Admission::Frozen(payload) => return Err(ApiError::Frozen(payload)),
    }

    let before = oms_db::entity_get(&state.pool, branch, rid)
        .await
        .map_err(store_err)?;

    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    oms_db::advisory_lock(
        &mut tx,
        branch_key(branch).as_bytes(),
        Duration::from_secs(state.cfg.locks.default_timeout_s.max(1) as u64),
    )
    .await
    .map_err(store_err)?;

    oms_db::entity_delete(&mut tx, branch, rid, expected_version, cascade)
        .await
        .map_err(store_err)?;
    oms_db::branch_touch(&mut tx, branch, None, &ctx.username)
        .await
        .map_err(store_err)?;

    let subject = subjects::entity(kind.as_str(), "deleted");
    let (envelope, outbox_event) = oms_outbox::build_event(
        &state.sanitizer,
        state.cfg.outbox.max_retries,
        oms_outbox::EventInput {
            event_type: format!("com.oms.{subject}"),
            subject: subject.clone(),
            data: json!({ "rid": rid, "api_name": before.api_name, "cascade": cascade }),
            branch: branch.to_string(),
            author: ctx.username.clone(),
            correlation_id: None,
            causation_id: None,
            commit: None,
            tenant: ctx.tenant.clone(),
            idempotency_key: Some(format!("{branch}:{}:{rid}:deleted", kind.as_str())),
        },
    )
    .map_err(|e| ApiError::kind(oms_schemas::ErrorKind::InvalidArgument, format!("{e:#}")))?;
    oms_db::outbox_insert(&mut tx, &outbox_event)
        .await
        .map_err(store_err)?;

    let audit = AuditRecord {
        event_id: Uuid::new_v4(),
        action: "schema.deleted".to_string(),
        actor_id: ctx.sub.clone(),
        actor_roles: ctx.roles.clone(),
        target_kind: kind.as_str().to_string(),
        target_id: rid.to_string(),
        branch: Some(branch.to_string()),
        success: true,
        error_code: None,
        duration_ms: started.elapsed().as_millis() as i64,
        changes: AuditChanges {
            before: serde_json::to_value(&before.entity).ok(),
            after: None,
            fields_changed: Vec::new(),
        },
        metadata: json!({ "cascade": cascade }),
        time_utc: Utc::now(),
    };
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;

    tx.commit().await.map_err(commit_err)?;
    let _ = state.bus.send(BusMsg::Event {
        subject,
        event_id: envelope.id,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------------

/// Audit record for a command-level action without an entity before/after
/// pair (branch and changeset lifecycle operations).
fn action_audit(
    ctx: &UserContext,
    action: &str,
    target_kind: &str,
    target_id: &str,
    branch: Option<&str>,
    started: Instant,
    metadata: serde_json::Value,
) -> AuditRecord {
    AuditRecord {
        event_id: Uuid::new_v4(),
        action: action.to_string(),
        actor_id: ctx.sub.clone(),
        actor_roles: ctx.roles.clone(),
        target_kind: target_kind.to_string(),
        target_id: target_id.to_string(),
        branch: branch.map(str::to_string),
        success: true,
        error_code: None,
        duration_ms: started.elapsed().as_millis() as i64,
        changes: AuditChanges::default(),
        metadata,
        time_utc: Utc::now(),
    }
}

pub async fn create_branch(
    state: &AppState,
    ctx: &UserContext,
    name: &str,
) -> Result<Branch, ApiError> {
    let started = Instant::now();

    // Branch row, outbox event, and audit record commit atomically: a
    // crash can never leave a branch without its `branch.created` event.
    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    let branch = oms_db::branch_create(&mut tx, name, &ctx.username)
        .await
        .map_err(store_err)?;

    let (envelope, outbox_event) = oms_outbox::build_event(
        &state.sanitizer,
        state.cfg.outbox.max_retries,
        oms_outbox::EventInput {
            event_type: format!("com.oms.{}", subjects::BRANCH_CREATED),
            subject: subjects::BRANCH_CREATED.to_string(),
            data: json!({ "branch": name }),
            branch: name.to_string(),
            author: ctx.username.clone(),
            correlation_id: None,
            causation_id: None,
            commit: None,
            tenant: ctx.tenant.clone(),
            idempotency_key: Some(format!("branch:{name}:created")),
        },
    )
    .map_err(|e| ApiError::kind(oms_schemas::ErrorKind::InvalidArgument, format!("{e:#}")))?;
    oms_db::outbox_insert(&mut tx, &outbox_event)
        .await
        .map_err(store_err)?;

    let audit = action_audit(
        ctx,
        "branch.create",
        "branch",
        name,
        Some(name),
        started,
        json!({}),
    );
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;

    tx.commit().await.map_err(commit_err)?;

    let _ = state.bus.send(BusMsg::Event {
        subject: subjects::BRANCH_CREATED.to_string(),
        event_id: envelope.id,
    });
    Ok(branch)
}

pub async fn archive_branch(
    state: &AppState,
    ctx: &UserContext,
    name: &str,
) -> Result<Branch, ApiError> {
    let started = Instant::now();
    let branch = oms_db::branch_get(&state.pool, name).await.map_err(store_err)?;

    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    oms_db::branch_set_state(&mut tx, name, BranchState::Archived, branch.version, &ctx.username)
        .await
        .map_err(store_err)?;

    let audit = action_audit(
        ctx,
        "branch.archive",
        "branch",
        name,
        Some(name),
        started,
        json!({ "previous_state": branch.state.as_str() }),
    );
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;

    tx.commit().await.map_err(commit_err)?;
    oms_db::branch_get(&state.pool, name).await.map_err(store_err)
}

// ---------------------------------------------------------------------------
// Changesets + merge
// ---------------------------------------------------------------------------

pub async fn create_changeset(
    state: &AppState,
    ctx: &UserContext,
    source_branch: &str,
    target_branch: &str,
    mutations: Vec<EntityMutation>,
) -> Result<ChangeSet, ApiError> {
    let started = Instant::now();
    let target = oms_db::branch_get(&state.pool, target_branch)
        .await
        .map_err(store_err)?;

    // Materialize the merge base: the target branch as of now.
    let base_snapshot: Vec<SchemaEntity> = oms_db::entity_list_branch(&state.pool, target_branch)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.entity)
        .collect();

    let now = Utc::now();
    let cs = ChangeSet {
        id: Uuid::new_v4(),
        source_branch: source_branch.to_string(),
        target_branch: target_branch.to_string(),
        state: ChangeSetState::Draft,
        base_commit: target.head_commit.unwrap_or_else(|| "root".to_string()),
        base_snapshot,
        mutations,
        created_at_utc: now,
        created_by: ctx.username.clone(),
        updated_at_utc: now,
        updated_by: ctx.username.clone(),
    };

    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    oms_db::changeset_insert(&mut tx, &cs).await.map_err(store_err)?;
    let audit = action_audit(
        ctx,
        "changeset.create",
        "changeset",
        &cs.id.to_string(),
        Some(target_branch),
        started,
        json!({
            "source_branch": cs.source_branch,
            "mutations": cs.mutations.len(),
        }),
    );
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;
    tx.commit().await.map_err(commit_err)?;

    Ok(cs)
}

pub async fn approve_changeset(
    state: &AppState,
    ctx: &UserContext,
    id: Uuid,
) -> Result<ChangeSet, ApiError> {
    let started = Instant::now();
    let cs = oms_db::changeset_get(&state.pool, id).await.map_err(store_err)?;

    let steps: &[(ChangeSetState, ChangeSetState)] = match cs.state {
        ChangeSetState::Draft => &[
            (ChangeSetState::Draft, ChangeSetState::Review),
            (ChangeSetState::Review, ChangeSetState::Approved),
        ],
        ChangeSetState::Review => &[(ChangeSetState::Review, ChangeSetState::Approved)],
        other => {
            return Err(ApiError::kind(
                oms_schemas::ErrorKind::PreconditionFailed,
                format!("changeset is {}, not approvable", other.as_str()),
            ))
        }
    };

    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    for (from, to) in steps {
        let moved = oms_db::changeset_set_state(&mut tx, id, *from, *to, &ctx.username)
            .await
            .map_err(store_err)?;
        if !moved {
            return Err(ApiError::kind(
                oms_schemas::ErrorKind::Conflict,
                "changeset state moved concurrently",
            ));
        }
    }
    let audit = action_audit(
        ctx,
        "changeset.approve",
        "changeset",
        &id.to_string(),
        Some(&cs.target_branch),
        started,
        json!({ "from_state": cs.state.as_str() }),
    );
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;
    tx.commit().await.map_err(commit_err)?;

    oms_db::changeset_get(&state.pool, id).await.map_err(store_err)
}

/// Merge an approved changeset into its target branch.
pub async fn merge_changeset(
    state: &AppState,
    ctx: &UserContext,
    target_branch: &str,
    changeset_id: Uuid,
    auto_resolve: bool,
) -> Result<MergeResult, ApiError> {
    let started = Instant::now();

    let cs = oms_db::changeset_get(&state.pool, changeset_id)
        .await
        .map_err(store_err)?;
    if cs.target_branch != target_branch {
        return Err(ApiError::kind(
            oms_schemas::ErrorKind::InvalidArgument,
            format!("changeset targets '{}', not '{target_branch}'", cs.target_branch),
        ));
    }
    if cs.state != ChangeSetState::Approved {
        return Err(ApiError::kind(
            oms_schemas::ErrorKind::PreconditionFailed,
            format!("changeset is {}, not approved", cs.state.as_str()),
        ));
    }

    let branch = oms_db::branch_get(&state.pool, target_branch)
        .await
        .map_err(store_err)?;
    if !branch.state.accepts_merge() {
        return Err(ApiError::kind(
            oms_schemas::ErrorKind::PreconditionFailed,
            format!("branch is {}, merges require ACTIVE or READY", branch.state.as_str()),
        ));
    }

    // Source = base + the changeset's mutations.
    let source = apply_mutations(&cs.base_snapshot, &cs.mutations);
    let target_rows = oms_db::entity_list_branch(&state.pool, target_branch)
        .await
        .map_err(store_err)?;
    let target: Vec<SchemaEntity> = target_rows.iter().map(|r| r.entity.clone()).collect();

    let result = oms_merge::merge(&cs.base_snapshot, &source, &target, MergeOptions { auto_resolve });

    match result.status {
        MergeStatus::ManualRequired => {
            return Err(ApiError::MergeBlocked {
                status: "manual_required",
                conflicts: result.conflicts,
            });
        }
        MergeStatus::Failed => {
            return Err(ApiError::MergeBlocked {
                status: "failed",
                conflicts: result.conflicts,
            });
        }
        MergeStatus::Success => {}
    }

    // Persist the merged snapshot in one transaction.
    let mut tx = oms_db::begin(&state.pool).await.map_err(store_err)?;
    oms_db::advisory_lock(
        &mut tx,
        branch_key(target_branch).as_bytes(),
        Duration::from_secs(state.cfg.locks.default_timeout_s.max(1) as u64),
    )
    .await
    .map_err(store_err)?;

    let mut merged_rids = std::collections::BTreeSet::new();
    for entity in &result.merged {
        merged_rids.insert(entity.rid());
        let existing = target_rows.iter().find(|r| r.rid == entity.rid());
        match existing {
            None => {
                oms_db::entity_put(&mut tx, target_branch, entity, None)
                    .await
                    .map_err(store_err)?;
            }
            Some(row) if !oms_merge::semantically_equal(&row.entity, entity) => {
                oms_db::entity_put(&mut tx, target_branch, entity, Some(row.version))
                    .await
                    .map_err(store_err)?;
            }
            Some(_) => {}
        }
    }
    for row in &target_rows {
        if !merged_rids.contains(&row.rid) {
            oms_db::entity_delete(&mut tx, target_branch, row.rid, row.version, true)
                .await
                .map_err(store_err)?;
        }
    }

    let merge_commit = &result.result_hash[..12.min(result.result_hash.len())];
    if branch.state == BranchState::Ready {
        oms_db::branch_set_state(&mut tx, target_branch, BranchState::Active, branch.version, &ctx.username)
            .await
            .map_err(store_err)?;
    }
    oms_db::branch_touch(&mut tx, target_branch, Some(merge_commit), &ctx.username)
        .await
        .map_err(store_err)?;

    let (envelope, outbox_event) = oms_outbox::build_event(
        &state.sanitizer,
        state.cfg.outbox.max_retries,
        oms_outbox::EventInput {
            event_type: format!("com.oms.{}", subjects::BRANCH_MERGED),
            subject: subjects::BRANCH_MERGED.to_string(),
            data: json!({
                "changeset_id": cs.id,
                "source_branch": cs.source_branch,
                "target_branch": target_branch,
                "result_hash": result.result_hash,
                "auto_resolved": result.stats.auto_resolved,
            }),
            branch: target_branch.to_string(),
            author: ctx.username.clone(),
            correlation_id: None,
            causation_id: None,
            commit: Some(merge_commit.to_string()),
            tenant: ctx.tenant.clone(),
            idempotency_key: Some(format!("merge:{}", cs.id)),
        },
    )
    .map_err(|e| ApiError::kind(oms_schemas::ErrorKind::InvalidArgument, format!("{e:#}")))?;
    oms_db::outbox_insert(&mut tx, &outbox_event)
        .await
        .map_err(store_err)?;

    let audit = AuditRecord {
        event_id: Uuid::new_v4(),
        action: "branch.merge".to_string(),
        actor_id: ctx.sub.clone(),
        actor_roles: ctx.roles.clone(),
        target_kind: "branch".to_string(),
        target_id: target_branch.to_string(),
        branch: Some(target_branch.to_string()),
        success: true,
        error_code: None,
        duration_ms: started.elapsed().as_millis() as i64,
        changes: AuditChanges::default(),
        metadata: json!({
            "changeset_id": cs.id,
            "result_hash": result.result_hash,
            "conflicts": result.conflicts.len(),
        }),
        time_utc: Utc::now(),
    };
    oms_db::audit_insert(&mut tx, &audit).await.map_err(store_err)?;

    // The changeset becomes immutable in the same transaction as the
    // merged snapshot; a racing approve/merge loses on the guarded update.
    let moved = oms_db::changeset_set_state(
        &mut tx,
        cs.id,
        ChangeSetState::Approved,
        ChangeSetState::Merged,
        &ctx.username,
    )
    .await
    .map_err(store_err)?;
    if !moved {
        return Err(ApiError::kind(
            oms_schemas::ErrorKind::Conflict,
            "changeset state moved while merging",
        ));
    }

    tx.commit().await.map_err(commit_err)?;

    let _ = state.bus.send(BusMsg::Event {
        subject: subjects::BRANCH_MERGED.to_string(),
        event_id: envelope.id,
    });
    info!(
        target = %target_branch,
        changeset = %cs.id,
        hash = %result.result_hash,
        duration_ms = started.elapsed().as_millis() as u64,
        "branch merged"
    );
    Ok(result)
}

/// Apply a changeset's mutation list to a snapshot.
fn apply_mutations(base: &[SchemaEntity], mutations: &[EntityMutation]) -> Vec<SchemaEntity> {
    let mut map: std::collections::BTreeMap<Uuid, SchemaEntity> =
        base.iter().map(|e| (e.rid(), e.clone())).collect();
    for m in mutations {
        match m.op {
            MutationOp::Add | MutationOp::Modify => {
                if let Some(entity) = &m.entity {
                    map.insert(m.rid, entity.clone());
                }
            }
            MutationOp::Delete => {
                map.remove(&m.rid);
            }
        }
    }
    map.into_values().collect()
}

fn branch_key(branch: &str) -> String {
    format!("branch:{branch}")
}
