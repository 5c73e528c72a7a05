//! The conflict rule table.
//!
//! Every overlap (both sides touched the same rid) runs through
//! [`resolve_overlap`], which classifies the conflict, picks the
//! deterministic resolution, and grades it:
//!
//! - INFO/WARN resolve automatically when `auto_resolve` is on;
//! - ERROR/BLOCK always land in the manual pile.
//!
//! Rules are pure: no IO, no clock (timestamps on merged entities are the
//! engine's concern).

use oms_schemas::{
    BaseType, Cardinality, EntityStatus, InterfaceSpec, LinkTypeSpec, ObjectTypeSpec,
    PropertyConstraints, PropertySpec, SchemaEntity,
};

use crate::types::{Change, ChangeKind, Conflict, MergeOptions, Severity};

/// Outcome of one overlap resolution.
#[derive(Debug)]
pub struct RuleOutcome {
    /// Merged entity; `None` means the delete wins.
    pub merged: Option<SchemaEntity>,
    pub conflicts: Vec<Conflict>,
}

pub fn resolve_overlap(
    base: Option<&SchemaEntity>,
    source: &Change,
    target: &Change,
    opts: MergeOptions,
) -> RuleOutcome {
    match (source.kind, target.kind) {
        (ChangeKind::Delete, ChangeKind::Delete) => RuleOutcome {
            merged: None,
            conflicts: Vec::new(),
        },
        (ChangeKind::Delete, _) => delete_vs_modify(base, target, opts),
        (_, ChangeKind::Delete) => delete_vs_modify(base, source, opts),
        _ => {
            let (Some(s), Some(t)) = (source.entity.as_ref(), target.entity.as_ref()) else {
                // Add/Modify changes always carry an entity; treat a
                // malformed change as no-op rather than guessing.
                return RuleOutcome {
                    merged: base.cloned(),
                    conflicts: Vec::new(),
                };
            };
            both_sides_present(base, s, t, opts)
        }
    }
}

// ---------------------------------------------------------------------------
// Delete vs Modify
// ---------------------------------------------------------------------------

fn delete_vs_modify(
    base: Option<&SchemaEntity>,
    surviving: &Change,
    opts: MergeOptions,
) -> RuleOutcome {
    let Some(modified) = surviving.entity.as_ref() else {
        return RuleOutcome {
            merged: None,
            conflicts: Vec::new(),
        };
    };

    // Deprecated entities yield to the delete.
    if let Some(b) = base {
        if b.header().status == EntityStatus::Deprecated {
            return RuleOutcome {
                merged: None,
                conflicts: vec![conflict(
                    modified,
                    None,
                    "entity was deleted on one side and modified on the other; it is deprecated, so the delete wins",
                    Severity::Info,
                    "delete_deprecated",
                    opts,
                    vec![],
                )],
            };
        }
    }

    // A delete never auto-overrides a modification that strengthened
    // constraints; that pairing always goes to a human.
    let tightened = match (base, modified) {
        (Some(SchemaEntity::Property(b)), SchemaEntity::Property(m)) => {
            constraints_tightened(&b.constraints, &m.constraints)
        }
        (None, SchemaEntity::Property(m)) => m.constraints.required,
        _ => false,
    };

    if tightened {
        return RuleOutcome {
            merged: Some(modified.clone()),
            conflicts: vec![Conflict {
                rid: modified.rid(),
                api_name: modified.api_name().to_string(),
                field: None,
                description: "deleted on one side, modified with stricter constraints on the other"
                    .to_string(),
                severity: Severity::Error,
                resolution: "manual".to_string(),
                auto_resolved: false,
                suggested_resolutions: vec![
                    "keep_modification_with_soft_delete".to_string(),
                    "manual_merge".to_string(),
                ],
            }],
        };
    }

    RuleOutcome {
        merged: Some(modified.clone()),
        conflicts: vec![conflict(
            modified,
            None,
            "deleted on one side, modified on the other; the modification wins",
            Severity::Warn,
            "keep_modification",
            opts,
            vec![],
        )],
    }
}

/// Did `modified` strengthen constraints relative to `base`?
fn constraints_tightened(base: &PropertyConstraints, modified: &PropertyConstraints) -> bool {
    if !base.required && modified.required {
        return true;
    }
    if base.pattern.is_none() && modified.pattern.is_some() {
        return true;
    }
    match (base.min, modified.min) {
        (None, Some(_)) => return true,
        (Some(b), Some(m)) if m > b => return true,
        _ => {}
    }
    match (base.max, modified.max) {
        (None, Some(_)) => return true,
        (Some(b), Some(m)) if m < b => return true,
        _ => {}
    }
    if let (Some(b), Some(m)) = (&base.enum_values, &modified.enum_values) {
        if m.iter().filter(|v| b.contains(v)).count() < b.len() {
            return true;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Both sides carry an entity
// ---------------------------------------------------------------------------

/// System-origin entities outrank user-origin ones in the id-collision
/// cascade. Origin is carried in `created_by`: the internal writers stamp
/// `system`, `lock-manager`, or an `svc:`-prefixed service subject.
fn origin_rank(h: &oms_schemas::EntityHeader) -> u8 {
    let by = h.created_by.as_str();
    if by == "system" || by == "lock-manager" || by.starts_with("svc:") {
        1
    } else {
        0
    }
}

/// The id-collision tiebreak cascade: kind precedence, then system over
/// user, then earlier creation. `None` means nothing yields and the
/// collision goes to a human.
fn kind_tiebreak<'a>(
    s: &'a SchemaEntity,
    t: &'a SchemaEntity,
) -> Option<(&'a SchemaEntity, &'a SchemaEntity, &'static str)> {
    use std::cmp::Ordering::*;

    match s.kind().precedence().cmp(&t.kind().precedence()) {
        Greater => return Some((s, t, "kind_precedence")),
        Less => return Some((t, s, "kind_precedence")),
        Equal => {}
    }
    match origin_rank(s.header()).cmp(&origin_rank(t.header())) {
        Greater => return Some((s, t, "system_over_user")),
        Less => return Some((t, s, "system_over_user")),
        Equal => {}
    }
    match s.header().created_at_utc.cmp(&t.header().created_at_utc) {
        Less => Some((s, t, "earlier_creation")),
        Greater => Some((t, s, "earlier_creation")),
        Equal => None,
    }
}

fn both_sides_present(
    base: Option<&SchemaEntity>,
    s: &SchemaEntity,
    t: &SchemaEntity,
    opts: MergeOptions,
) -> RuleOutcome {
    // Same id, differing kind: run the tiebreak cascade. ERROR when no
    // level yields.
    if s.kind() != t.kind() {
        return match kind_tiebreak(s, t) {
            Some((winner, loser, rule)) => RuleOutcome {
                merged: Some(winner.clone()),
                conflicts: vec![conflict(
                    winner,
                    None,
                    &format!(
                        "same id used as {} and {}; {} wins by {}",
                        s.kind().as_str(),
                        t.kind().as_str(),
                        winner.kind().as_str(),
                        rule
                    ),
                    Severity::Warn,
                    &format!("{rule}:{}", loser.kind().as_str()),
                    opts,
                    vec![],
                )],
            },
            None => RuleOutcome {
                // Keep the target side in the snapshot; the ERROR keeps
                // the merge out of `success` regardless.
                merged: Some(t.clone()),
                conflicts: vec![Conflict {
                    rid: t.rid(),
                    api_name: t.api_name().to_string(),
                    field: None,
                    description: format!(
                        "same id used as {} and {}; kind precedence, origin, and creation order all tie",
                        s.kind().as_str(),
                        t.kind().as_str()
                    ),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec![
                        "keep_source_entity".to_string(),
                        "keep_target_entity".to_string(),
                    ],
                }],
            },
        };
    }

    match (s, t) {
        (SchemaEntity::Property(sp), SchemaEntity::Property(tp)) => {
            let base_p = match base {
                Some(SchemaEntity::Property(b)) => Some(b),
                _ => None,
            };
            merge_property(base_p, sp, tp, opts)
        }
        (SchemaEntity::LinkType(sl), SchemaEntity::LinkType(tl)) => {
            let base_l = match base {
                Some(SchemaEntity::LinkType(b)) => Some(b),
                _ => None,
            };
            merge_link(base_l, sl, tl, opts)
        }
        (SchemaEntity::ObjectType(so), SchemaEntity::ObjectType(to)) => {
            merge_object(so, to, opts)
        }
        (SchemaEntity::Interface(si), SchemaEntity::Interface(ti)) => merge_interface(si, ti),
        (SchemaEntity::ActionType(sa), SchemaEntity::ActionType(ta)) => {
            let base_a = match base {
                Some(SchemaEntity::ActionType(b)) => Some(b),
                _ => None,
            };
            merge_action(base_a, sa, ta, opts)
        }
        // Kinds already matched above.
        _ => RuleOutcome {
            merged: Some(t.clone()),
            conflicts: Vec::new(),
        },
    }
}

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

fn merge_property(
    base: Option<&PropertySpec>,
    s: &PropertySpec,
    t: &PropertySpec,
    opts: MergeOptions,
) -> RuleOutcome {
    let mut merged = t.clone();
    let mut conflicts = Vec::new();
    let field = t.header.api_name.clone();

    // --- base type ---------------------------------------------------------
    if s.base_type != t.base_type {
        let base_ty = base.map(|b| b.base_type);
        match pick_base_type(base_ty, s.base_type, t.base_type) {
            TypePick::Widen(ty) => {
                merged.base_type = ty;
                conflicts.push(conflict_f(
                    &SchemaEntity::Property(t.clone()),
                    Some(field.clone()),
                    &format!("property type widened to {}", type_tag(ty)),
                    Severity::Info,
                    &format!("widen_to_{}", type_tag(ty)),
                    opts,
                    vec![],
                ));
            }
            TypePick::Manual => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: Some(field.clone()),
                    description: format!(
                        "property type changed incompatibly ({} vs {})",
                        type_tag(s.base_type),
                        type_tag(t.base_type)
                    ),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec![
                        "keep_source_type".to_string(),
                        "keep_target_type".to_string(),
                    ],
                });
            }
        }
    }

    // --- constraints -------------------------------------------------------
    let base_c = base.map(|b| &b.constraints);
    let (constraints, mut c_conflicts) = merge_constraints(
        base_c,
        &s.constraints,
        &t.constraints,
        &SchemaEntity::Property(t.clone()),
        &field,
        opts,
    );
    merged.constraints = constraints;
    conflicts.append(&mut c_conflicts);

    // --- value format ------------------------------------------------------
    if s.value_format != t.value_format {
        let base_fmt = base.and_then(|b| b.value_format.clone());
        let s_changed = s.value_format != base_fmt;
        let t_changed = t.value_format != base_fmt;
        match (s_changed, t_changed) {
            (true, false) => merged.value_format = s.value_format.clone(),
            (false, true) => merged.value_format = t.value_format.clone(),
            _ => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: Some(field.clone()),
                    description: "value format changed differently on both sides".to_string(),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec![
                        "keep_source_format".to_string(),
                        "keep_target_format".to_string(),
                    ],
                });
            }
        }
    }

    RuleOutcome {
        merged: Some(SchemaEntity::Property(merged)),
        conflicts,
    }
}

enum TypePick {
    Widen(BaseType),
    Manual,
}

/// Decide the merged base type given what each side did.
fn pick_base_type(base: Option<BaseType>, s: BaseType, t: BaseType) -> TypePick {
    match base {
        Some(b) => {
            let s_changed = s != b;
            let t_changed = t != b;
            match (s_changed, t_changed) {
                (true, false) if b.widens_to(s) => TypePick::Widen(s),
                (false, true) if b.widens_to(t) => TypePick::Widen(t),
                (true, true) if s.widens_to(t) && b.widens_to(t) => TypePick::Widen(t),
                (true, true) if t.widens_to(s) && b.widens_to(s) => TypePick::Widen(s),
                _ => TypePick::Manual,
            }
        }
        // Both sides added the property with different types.
        None => {
            if s.widens_to(t) {
                TypePick::Widen(t)
            } else if t.widens_to(s) {
                TypePick::Widen(s)
            } else {
                TypePick::Manual
            }
        }
    }
}

fn type_tag(ty: BaseType) -> String {
    format!("{ty:?}").to_ascii_lowercase()
}

/// Merge one constraint field: equal values pass through, a one-sided
/// change applies silently, and divergent changes are flagged for the
/// caller to resolve.
fn pick3<T: PartialEq + Clone>(b: &T, s: &T, t: &T) -> (T, bool) {
    if s == t {
        (s.clone(), false)
    } else if s == b {
        (t.clone(), false)
    } else if t == b {
        (s.clone(), false)
    } else {
        (s.clone(), true)
    }
}

fn merge_constraints(
    base: Option<&PropertyConstraints>,
    s: &PropertyConstraints,
    t: &PropertyConstraints,
    entity: &SchemaEntity,
    field: &str,
    opts: MergeOptions,
) -> (PropertyConstraints, Vec<Conflict>) {
    let default = PropertyConstraints::default();
    let b = base.unwrap_or(&default);
    let mut out = PropertyConstraints::default();
    let mut conflicts = Vec::new();

    // Required: divergence is only possible when both sides added the
    // property; the stricter side wins.
    let (required, divergent) = pick3(&b.required, &s.required, &t.required);
    out.required = if divergent { s.required || t.required } else { required };

    // Numeric bounds: divergent changes intersect (restrictive, INFO).
    let (min, min_div) = pick3(&b.min, &s.min, &t.min);
    let (max, max_div) = pick3(&b.max, &s.max, &t.max);
    out.min = min;
    out.max = max;
    if min_div {
        out.min = match (s.min, t.min) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
    if max_div {
        out.max = match (s.max, t.max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    if min_div || max_div {
        conflicts.push(conflict_f(
            entity,
            Some(field.to_string()),
            "numeric bounds changed on both sides; merged by intersection",
            Severity::Info,
            "intersect_constraints",
            opts,
            vec![],
        ));
    }
    if let (Some(lo), Some(hi)) = (out.min, out.max) {
        if lo > hi {
            conflicts.push(Conflict {
                rid: entity.rid(),
                api_name: entity.api_name().to_string(),
                field: Some(field.to_string()),
                description: format!("intersected bounds are empty (min {lo} > max {hi})"),
                severity: Severity::Error,
                resolution: "manual".to_string(),
                auto_resolved: false,
                suggested_resolutions: vec!["relax_min".to_string(), "relax_max".to_string()],
            });
        }
    }

    // Enums. Additions union (INFO). EVERY removal — one-sided or
    // divergent — is graded WARN and the removed values move into the
    // deprecation window (`deprecated_values`): readers still accept
    // them, writers must not emit them, and a later cleanup drops them.
    out.enum_values = b.enum_values.clone();
    out.deprecated_values = b.deprecated_values.clone();
    if s.enum_values != b.enum_values || t.enum_values != b.enum_values {
        let base_enum = b.enum_values.clone().unwrap_or_default();
        let s_vals = s.enum_values.clone().unwrap_or_else(|| base_enum.clone());
        let t_vals = t.enum_values.clone().unwrap_or_else(|| base_enum.clone());

        let mut union: Vec<String> = base_enum.clone();
        for v in s_vals.iter().chain(t_vals.iter()) {
            if !union.contains(v) {
                union.push(v.clone());
            }
        }

        let removed: Vec<String> = base_enum
            .iter()
            .filter(|v| !s_vals.contains(v) || !t_vals.contains(v))
            .cloned()
            .collect();

        if union.len() > base_enum.len() {
            conflicts.push(conflict_f(
                entity,
                Some(field.to_string()),
                "enum values added; union applied",
                Severity::Info,
                "union_enum",
                opts,
                vec![],
            ));
        }
        if !removed.is_empty() {
            conflicts.push(conflict_f(
                entity,
                Some(field.to_string()),
                &format!(
                    "enum values removed ({}); moved to the deprecation window",
                    removed.join(", ")
                ),
                Severity::Warn,
                "remove_with_deprecation_window",
                opts,
                vec![],
            ));
        }

        let mut deprecated: Vec<String> = Vec::new();
        for v in b
            .deprecated_values
            .iter()
            .chain(s.deprecated_values.iter())
            .chain(t.deprecated_values.iter())
            .flatten()
            .chain(removed.iter())
        {
            if !deprecated.contains(v) {
                deprecated.push(v.clone());
            }
        }

        let kept: Vec<String> = union.into_iter().filter(|v| !removed.contains(v)).collect();
        out.enum_values = if kept.is_empty() && s.enum_values.is_none() && t.enum_values.is_none() {
            None
        } else {
            Some(kept)
        };
        out.deprecated_values = if deprecated.is_empty() { None } else { Some(deprecated) };
    }

    // Patterns cannot be merged mechanically; divergent edits are manual.
    let (pattern, pattern_div) = pick3(&b.pattern, &s.pattern, &t.pattern);
    out.pattern = pattern;
    if pattern_div {
        conflicts.push(Conflict {
            rid: entity.rid(),
            api_name: entity.api_name().to_string(),
            field: Some(field.to_string()),
            description: "both sides set different value patterns".to_string(),
            severity: Severity::Error,
            resolution: "manual".to_string(),
            auto_resolved: false,
            suggested_resolutions: vec![
                "keep_source_pattern".to_string(),
                "keep_target_pattern".to_string(),
            ],
        });
        out.pattern = s.pattern.clone();
    }

    (out, conflicts)
}

// ---------------------------------------------------------------------------
// Link type
// ---------------------------------------------------------------------------

fn merge_link(
    base: Option<&LinkTypeSpec>,
    s: &LinkTypeSpec,
    t: &LinkTypeSpec,
    opts: MergeOptions,
) -> RuleOutcome {
    let mut merged = t.clone();
    let mut conflicts = Vec::new();

    // Endpoints: one-sided changes apply; divergent changes are manual.
    let base_ends = base.map(|b| (b.source_rid, b.target_rid));
    let s_ends = (s.source_rid, s.target_rid);
    let t_ends = (t.source_rid, t.target_rid);
    if s_ends != t_ends {
        let s_changed = Some(s_ends) != base_ends;
        let t_changed = Some(t_ends) != base_ends;
        match (s_changed, t_changed) {
            (true, false) => {
                merged.source_rid = s.source_rid;
                merged.target_rid = s.target_rid;
            }
            (false, true) => {}
            _ => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: None,
                    description: "link endpoints changed differently on both sides".to_string(),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec![
                        "keep_source_endpoints".to_string(),
                        "keep_target_endpoints".to_string(),
                    ],
                });
            }
        }
    }

    // Cardinality: broadening is automatic, narrowing manual.
    if s.cardinality != t.cardinality {
        let base_card = base.map(|b| b.cardinality);
        let broadened = |from: Cardinality, to: Cardinality| from.broadens_to(to) && from != to;

        let pick = match base_card {
            Some(b) => {
                if broadened(b, s.cardinality) && !broadened(b, t.cardinality) && t.cardinality == b
                {
                    Some(s.cardinality)
                } else if broadened(b, t.cardinality)
                    && !broadened(b, s.cardinality)
                    && s.cardinality == b
                {
                    Some(t.cardinality)
                } else if broadened(b, s.cardinality) && broadened(b, t.cardinality) {
                    // Both broadened: take the broader of the two.
                    if s.cardinality.broadens_to(t.cardinality) {
                        Some(t.cardinality)
                    } else {
                        Some(s.cardinality)
                    }
                } else {
                    None
                }
            }
            None => {
                if s.cardinality.broadens_to(t.cardinality) {
                    Some(t.cardinality)
                } else if t.cardinality.broadens_to(s.cardinality) {
                    Some(s.cardinality)
                } else {
                    None
                }
            }
        };

        match pick {
            Some(card) => {
                // A single-step broadening is routine; the full 1:1 → N:M
                // jump is more disruptive and graded WARN.
                let severity = match (base_card, card) {
                    (Some(Cardinality::OneToOne), Cardinality::ManyToMany) => Severity::Warn,
                    _ => Severity::Info,
                };
                merged.cardinality = card;
                conflicts.push(conflict_f(
                    &SchemaEntity::LinkType(t.clone()),
                    None,
                    "cardinality broadened",
                    severity,
                    "broaden_cardinality",
                    opts,
                    vec![],
                ));
            }
            None => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: None,
                    description: "cardinality narrowed or changed incompatibly".to_string(),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec![
                        "keep_broader_cardinality".to_string(),
                        "manual_merge".to_string(),
                    ],
                });
            }
        }
    }

    RuleOutcome {
        merged: Some(SchemaEntity::LinkType(merged)),
        conflicts,
    }
}

// ---------------------------------------------------------------------------
// Object type / interface / action type
// ---------------------------------------------------------------------------

fn merge_object(s: &ObjectTypeSpec, t: &ObjectTypeSpec, opts: MergeOptions) -> RuleOutcome {
    let mut merged = t.clone();
    let mut conflicts = Vec::new();

    if s.implements != t.implements {
        let mut union = t.implements.clone();
        for rid in &s.implements {
            if !union.contains(rid) {
                union.push(*rid);
            }
        }
        merged.implements = union;
        conflicts.push(conflict_f(
            &SchemaEntity::ObjectType(t.clone()),
            None,
            "interface implementation sets merged by union",
            Severity::Info,
            "union_interfaces",
            opts,
            vec![],
        ));
    }

    if s.description != t.description && s.description.is_some() {
        merged.description = merged.description.or_else(|| s.description.clone());
    }

    RuleOutcome {
        merged: Some(SchemaEntity::ObjectType(merged)),
        conflicts,
    }
}

fn merge_interface(s: &InterfaceSpec, t: &InterfaceSpec) -> RuleOutcome {
    let mut merged = t.clone();
    let mut conflicts = Vec::new();

    for sp in &s.required_properties {
        match merged
            .required_properties
            .iter()
            .find(|tp| tp.api_name == sp.api_name)
        {
            None => merged.required_properties.push(sp.clone()),
            Some(tp) if tp.base_type == sp.base_type => {}
            Some(tp) => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: Some(sp.api_name.clone()),
                    description: format!(
                        "required property '{}' typed {} on one side and {} on the other",
                        sp.api_name,
                        type_tag(sp.base_type),
                        type_tag(tp.base_type)
                    ),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec!["manual_merge".to_string()],
                });
            }
        }
    }

    RuleOutcome {
        merged: Some(SchemaEntity::Interface(merged)),
        conflicts,
    }
}

fn merge_action(
    base: Option<&oms_schemas::ActionTypeSpec>,
    s: &oms_schemas::ActionTypeSpec,
    t: &oms_schemas::ActionTypeSpec,
    opts: MergeOptions,
) -> RuleOutcome {
    let mut merged = t.clone();
    let mut conflicts = Vec::new();

    if s.function_body != t.function_body {
        let base_body = base.map(|b| b.function_body.as_str());
        let s_changed = Some(s.function_body.as_str()) != base_body;
        let t_changed = Some(t.function_body.as_str()) != base_body;
        match (s_changed, t_changed) {
            (true, false) => merged.function_body = s.function_body.clone(),
            (false, true) => {}
            _ => {
                conflicts.push(Conflict {
                    rid: t.header.rid,
                    api_name: t.header.api_name.clone(),
                    field: Some("function_body".to_string()),
                    description: "function body edited on both sides".to_string(),
                    severity: Severity::Error,
                    resolution: "manual".to_string(),
                    auto_resolved: false,
                    suggested_resolutions: vec!["manual_merge".to_string()],
                });
            }
        }
    }

    if s.security_rules != t.security_rules {
        let mut union = t.security_rules.clone();
        for r in &s.security_rules {
            if !union.contains(r) {
                union.push(r.clone());
            }
        }
        merged.security_rules = union;
        conflicts.push(conflict_f(
            &SchemaEntity::ActionType(t.clone()),
            Some("security_rules".to_string()),
            "security rules merged by union",
            Severity::Info,
            "union_constraints",
            opts,
            vec![],
        ));
    }

    RuleOutcome {
        merged: Some(SchemaEntity::ActionType(merged)),
        conflicts,
    }
}

// ---------------------------------------------------------------------------
// Conflict constructors
// ---------------------------------------------------------------------------

fn conflict(
    entity: &SchemaEntity,
    field: Option<String>,
    description: &str,
    severity: Severity,
    resolution: &str,
    opts: MergeOptions,
    suggested: Vec<String>,
) -> Conflict {
    Conflict {
        rid: entity.rid(),
        api_name: entity.api_name().to_string(),
        field,
        description: description.to_string(),
        severity,
        resolution: resolution.to_string(),
        auto_resolved: severity.auto_resolvable() && opts.auto_resolve,
        suggested_resolutions: suggested,
    }
}

// Same as `conflict`; kept separate so property/link call sites read as
// field-scoped.
fn conflict_f(
    entity: &SchemaEntity,
    field: Option<String>,
    description: &str,
    severity: Severity,
    resolution: &str,
    opts: MergeOptions,
    suggested: Vec<String>,
) -> Conflict {
    conflict(entity, field, description, severity, resolution, opts, suggested)
}
