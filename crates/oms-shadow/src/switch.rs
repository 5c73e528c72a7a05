//! The atomic switch.
//!
//! Within the switch lock (and its timeout budget):
//!
//! 1. pre-switch validation — shadow artifact present, record count ≥ 1
//!    unless forced, size sanity;
//! 2. backup — rename the current artifact to a timestamped sibling;
//! 3. promote — filesystem-atomic rename (or copy-and-replace across
//!    volumes);
//! 4. post-switch verification — current artifact present and sized
//!    within expected bounds;
//! 5. rollback on any failure by moving the backup back.
//!
//! All filesystem work is `std::fs` with `.context()` on every call.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use oms_schemas::SwitchStrategy;

/// Caller-tunable switch options.
#[derive(Debug, Clone)]
pub struct SwitchOptions {
    pub backup_current: bool,
    pub switch_timeout_s: i64,
    /// Skip the record-count validation (logs a warning instead).
    pub force_switch: bool,
    pub strategy: SwitchStrategy,
    /// Post-switch size must land within `[expected_size / 2, expected_size * 2]`
    /// when an expected size is known.
    pub expected_size_bytes: Option<i64>,
    pub record_count: Option<i64>,
}

/// Contract result of the atomic switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchResult {
    pub success: bool,
    pub switch_duration_ms: i64,
    pub validation_errors: Vec<String>,
    pub verification_errors: Vec<String>,
    pub old_path: Option<String>,
    pub new_path: String,
    pub backup_path: Option<String>,
}

/// Promote `shadow_path` to `current_path`.
pub fn perform_switch(
    shadow_path: &Path,
    current_path: &Path,
    opts: &SwitchOptions,
) -> Result<SwitchResult> {
    let started = Instant::now();
    let deadline_ms = opts.switch_timeout_s.max(1) * 1000;

    let mut result = SwitchResult {
        success: false,
        switch_duration_ms: 0,
        validation_errors: Vec::new(),
        verification_errors: Vec::new(),
        old_path: current_path.exists().then(|| current_path.display().to_string()),
        new_path: current_path.display().to_string(),
        backup_path: None,
    };

    // 1. Pre-switch validation.
    result.validation_errors = validate_shadow(shadow_path, opts);
    if !result.validation_errors.is_empty() {
        result.switch_duration_ms = started.elapsed().as_millis() as i64;
        return Ok(result);
    }

    // 2. Backup.
    let backup_path = if opts.backup_current && current_path.exists() {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let backup = sibling_path(current_path, &format!("backup-{stamp}"));
        fs::rename(current_path, &backup).with_context(|| {
            format!("backup rename {} -> {}", current_path.display(), backup.display())
        })?;
        result.backup_path = Some(backup.display().to_string());
        Some(backup)
    } else {
        None
    };

    // 3. Promote.
    let promote = match opts.strategy {
        SwitchStrategy::AtomicRename => fs::rename(shadow_path, current_path).with_context(|| {
            format!("promote rename {} -> {}", shadow_path.display(), current_path.display())
        }),
        SwitchStrategy::CopyAndReplace => copy_and_replace(shadow_path, current_path),
    };

    if let Err(e) = promote {
        result.verification_errors.push(format!("promotion failed: {e:#}"));
        rollback(&mut result, backup_path.as_deref(), current_path);
        result.switch_duration_ms = started.elapsed().as_millis() as i64;
        return Ok(result);
    }

    // 4. Post-switch verification.
    result.verification_errors = verify_current(current_path, opts);

    // Budget check: a switch that overran its lock window is a failure
    // even if the filesystem work succeeded, because writes may already
    // have resumed against the old artifact's lock scope.
    let elapsed_ms = started.elapsed().as_millis() as i64;
    if elapsed_ms > deadline_ms {
        result
            .verification_errors
            .push(format!("switch exceeded its {deadline_ms} ms budget ({elapsed_ms} ms)"));
    }

    if !result.verification_errors.is_empty() {
        // 5. Rollback: put the previous artifact back.
        if current_path.exists() {
            // Move the failed promotion out of the way first.
            let failed = sibling_path(current_path, "failed-switch");
            let _ = fs::remove_dir_all(&failed);
            let _ = fs::remove_file(&failed);
            if let Err(e) = fs::rename(current_path, &failed) {
                result
                    .verification_errors
                    .push(format!("could not quarantine failed artifact: {e}"));
            }
        }
        rollback(&mut result, backup_path.as_deref(), current_path);
        result.switch_duration_ms = started.elapsed().as_millis() as i64;
        return Ok(result);
    }

    result.success = true;
    result.switch_duration_ms = elapsed_ms;
    Ok(result)
}

fn validate_shadow(shadow_path: &Path, opts: &SwitchOptions) -> Vec<String> {
    let mut errors = Vec::new();

    if !shadow_path.exists() {
        errors.push(format!("shadow artifact missing: {}", shadow_path.display()));
        return errors;
    }

    match opts.record_count {
        Some(n) if n < 1 => {
            if opts.force_switch {
                warn!(
                    record_count = n,
                    "forcing switch with an empty shadow index"
                );
            } else {
                errors.push(format!("shadow record count {n} < 1 (pass force_switch to override)"));
            }
        }
        None if !opts.force_switch => {
            errors.push("shadow record count unknown (pass force_switch to override)".to_string());
        }
        _ => {}
    }

    if let Some(expected) = opts.expected_size_bytes {
        match artifact_size(shadow_path) {
            Ok(actual) if expected > 0 && (actual < expected / 2 || actual > expected * 2) => {
                errors.push(format!(
                    "shadow size {actual} bytes outside sane bounds of expected {expected}"
                ));
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("could not size shadow artifact: {e}")),
        }
    }

    errors
}

fn verify_current(current_path: &Path, opts: &SwitchOptions) -> Vec<String> {
    let mut errors = Vec::new();

    if !current_path.exists() {
        errors.push(format!("current artifact missing after switch: {}", current_path.display()));
        return errors;
    }

    match artifact_size(current_path) {
        Ok(actual) => {
            if let Some(expected) = opts.expected_size_bytes {
                if expected > 0 && (actual < expected / 2 || actual > expected * 2) {
                    errors.push(format!(
                        "current size {actual} bytes outside sane bounds of expected {expected}"
                    ));
                }
            }
        }
        Err(e) => errors.push(format!("current artifact unreadable: {e}")),
    }

    errors
}

fn rollback(result: &mut SwitchResult, backup: Option<&Path>, current_path: &Path) {
    if let Some(backup) = backup {
        match fs::rename(backup, current_path) {
            Ok(()) => {
                result.backup_path = None;
            }
            Err(e) => {
                result
                    .verification_errors
                    .push(format!("rollback failed, backup retained at {}: {e}", backup.display()));
            }
        }
    }
}

/// Copy-and-replace for cross-volume moves: copy into a staging sibling of
/// the destination, then rename over it (the final hop stays atomic).
fn copy_and_replace(shadow_path: &Path, current_path: &Path) -> Result<()> {
    let staging = sibling_path(current_path, "staging");
    let _ = fs::remove_file(&staging);
    let _ = fs::remove_dir_all(&staging);

    if shadow_path.is_dir() {
        copy_dir(shadow_path, &staging)?;
    } else {
        fs::copy(shadow_path, &staging)
            .with_context(|| format!("copy {} -> {}", shadow_path.display(), staging.display()))?;
    }

    fs::rename(&staging, current_path)
        .with_context(|| format!("replace {} -> {}", staging.display(), current_path.display()))?;

    // Source cleanup is best-effort; the shadow row moves to CLEANUP.
    if shadow_path.is_dir() {
        let _ = fs::remove_dir_all(shadow_path);
    } else {
        let _ = fs::remove_file(shadow_path);
    }
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create_dir_all {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read_dir {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {} -> {}", entry.path().display(), target.display()))?;
        }
    }
    Ok(())
}

fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!("{name}.{tag}"))
}

/// Size of a file, or the recursive size of a directory artifact.
pub fn artifact_size(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.is_file() {
        return Ok(meta.len() as i64);
    }
    let mut total: i64 = 0;
    for entry in fs::read_dir(path).with_context(|| format!("read_dir {}", path.display()))? {
        let entry = entry?;
        total += artifact_size(&entry.path())?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(record_count: Option<i64>) -> SwitchOptions {
        SwitchOptions {
            backup_current: true,
            switch_timeout_s: 10,
            force_switch: false,
            strategy: SwitchStrategy::AtomicRename,
            expected_size_bytes: None,
            record_count,
        }
    }

    #[test]
    fn successful_switch_promotes_and_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().join("index.shadow");
        let current = dir.path().join("index.current");
        fs::write(&shadow, b"new index data").unwrap();
        fs::write(&current, b"old index data").unwrap();

        let r = perform_switch(&shadow, &current, &opts(Some(100))).unwrap();
        assert!(r.success, "switch failed: {:?}", r.validation_errors);
        assert_eq!(fs::read(&current).unwrap(), b"new index data");
        assert!(r.backup_path.is_some());
        assert!(!shadow.exists());
        assert!(r.switch_duration_ms < 3000);
    }

    #[test]
    fn zero_record_count_fails_validation_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().join("index.shadow");
        let current = dir.path().join("index.current");
        fs::write(&shadow, b"empty").unwrap();
        fs::write(&current, b"old").unwrap();

        let r = perform_switch(&shadow, &current, &opts(Some(0))).unwrap();
        assert!(!r.success);
        assert!(!r.validation_errors.is_empty());
        // Untouched current on validation failure.
        assert_eq!(fs::read(&current).unwrap(), b"old");

        let mut forced = opts(Some(0));
        forced.force_switch = true;
        let r = perform_switch(&shadow, &current, &forced).unwrap();
        assert!(r.success);
        assert_eq!(fs::read(&current).unwrap(), b"empty");
    }

    #[test]
    fn missing_shadow_artifact_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().join("nope");
        let current = dir.path().join("index.current");
        fs::write(&current, b"old").unwrap();

        let r = perform_switch(&shadow, &current, &opts(Some(10))).unwrap();
        assert!(!r.success);
        assert!(r.validation_errors[0].contains("missing"));
        assert_eq!(fs::read(&current).unwrap(), b"old");
    }

    #[test]
    fn size_bound_violation_rolls_back_to_the_old_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().join("index.shadow");
        let current = dir.path().join("index.current");
        fs::write(&shadow, b"tiny").unwrap();
        fs::write(&current, b"old index data").unwrap();

        let mut o = opts(Some(10));
        o.expected_size_bytes = Some(1_000_000);
        let r = perform_switch(&shadow, &current, &o).unwrap();
        assert!(!r.success);
        // Pre-switch validation catches the size problem before any move.
        assert!(!r.validation_errors.is_empty());
        assert_eq!(fs::read(&current).unwrap(), b"old index data");
    }

    #[test]
    fn copy_and_replace_strategy_promotes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = dir.path().join("shadow-dir");
        let current = dir.path().join("current-dir");
        fs::create_dir(&shadow).unwrap();
        fs::write(shadow.join("segment-0"), b"data").unwrap();
        fs::create_dir(&current).unwrap();
        fs::write(current.join("segment-0"), b"old").unwrap();

        let mut o = opts(Some(5));
        o.strategy = SwitchStrategy::CopyAndReplace;
        let r = perform_switch(&shadow, &current, &o).unwrap();
        assert!(r.success, "{:?} {:?}", r.validation_errors, r.verification_errors);
        assert_eq!(fs::read(current.join("segment-0")).unwrap(), b"data");
    }
}
