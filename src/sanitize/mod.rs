//! Mutating phase: strips forbidden pattern spans out of text artifacts.
//!
//! Sanitization is strictly scoped: only `ForbiddenPattern` violations are
//! eligible, and a file is always backed up before its first mutation.
//! Forbidden files and config keys are reported, never rewritten; deleting or
//! restructuring artifacts is an operator decision.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::SanitizerConfig;
use crate::ledger::chain::sha256_hex;
use crate::policy::Policy;
use crate::scanner::{Violation, ViolationKind};

/// What a single mutation record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    /// A pristine copy of the file was written before any change.
    BackedUp,
    /// One rule's spans were replaced by sentinels (one record per rule).
    Stripped,
    /// The rewritten file was committed to disk.
    Sanitized,
    /// The mutation failed; the original file is untouched.
    Error,
    /// Nothing to change (already sanitized, or dry-run).
    NoOp,
}

/// One entry in the mutation trail of a run. Append-only once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub action: MutationAction,
    /// Path relative to the scan root.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_after: Option<String>,
    /// Rule ids whose spans were (or would be) stripped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MutationRecord {
    fn new(action: MutationAction, path: PathBuf) -> Self {
        Self {
            action,
            path,
            backup_path: None,
            hash_before: None,
            hash_after: None,
            rule_ids: Vec::new(),
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

/// Replacement text spliced in for every stripped span.
///
/// Embeds the rule id for auditability and contains no forbidden token, so a
/// re-scan of sanitized output stays quiet.
#[must_use]
pub fn sentinel(rule_id: &str) -> String {
    format!("/* [stripped:{rule_id}] */")
}

/// Two-phase mutator: backs up, then strips, one file at a time.
pub struct Sanitizer<'p> {
    policy: &'p Policy,
    config: SanitizerConfig,
}

impl<'p> Sanitizer<'p> {
    pub fn new(policy: &'p Policy, config: SanitizerConfig) -> Self {
        Self { policy, config }
    }

    /// Apply sanitization for every eligible violation under `root`.
    ///
    /// Files are processed in path order; per file the record sequence is
    /// `BackedUp`, one `Stripped` per applied rule, then `Sanitized` (or a
    /// single `Error`/`NoOp`). In dry-run mode no file is touched and each
    /// eligible file yields one `NoOp` record carrying the rule ids that
    /// would have been stripped.
    pub fn sanitize(&self, root: &Path, violations: &[Violation]) -> Vec<MutationRecord> {
        let mut by_path: BTreeMap<&Path, Vec<&str>> = BTreeMap::new();
        for violation in violations {
            if violation.kind == ViolationKind::ForbiddenPattern {
                by_path
                    .entry(violation.path.as_path())
                    .or_default()
                    .push(violation.detail.as_str());
            }
        }

        let mut records = Vec::new();
        for (relative, rule_ids) in by_path {
            self.sanitize_file(root, relative, &rule_ids, &mut records);
        }
        records
    }

    fn sanitize_file(
        &self,
        root: &Path,
        relative: &Path,
        rule_ids: &[&str],
        records: &mut Vec<MutationRecord>,
    ) {
        let absolute = root.join(relative);

        let original = match fs::read_to_string(&absolute) {
            Ok(text) => text,
            Err(err) => {
                let mut rec = MutationRecord::new(MutationAction::Error, relative.to_path_buf());
                rec.detail = Some(format!("read failed: {err}"));
                records.push(rec);
                return;
            }
        };
        let hash_before = sha256_hex(original.as_bytes());

        let mut stripped = original.clone();
        let mut applied: Vec<String> = Vec::new();
        for rule_id in rule_ids {
            // Rules may have been removed between scan and sanitize; skip
            // silently rather than failing the file.
            let Some(rule) = self.policy.rule(rule_id) else {
                continue;
            };
            let (next, count) = rule.strip(&stripped, &sentinel(rule_id));
            if count > 0 {
                stripped = next;
                applied.push((*rule_id).to_string());
            }
        }

        if applied.is_empty() {
            let mut rec = MutationRecord::new(MutationAction::NoOp, relative.to_path_buf());
            rec.hash_before = Some(hash_before);
            records.push(rec);
            return;
        }

        if self.config.dry_run {
            let mut rec = MutationRecord::new(MutationAction::NoOp, relative.to_path_buf());
            rec.hash_before = Some(hash_before);
            rec.rule_ids = applied;
            rec.detail = Some("dry-run: file not modified".to_string());
            records.push(rec);
            return;
        }

        let backup = next_backup_path(&absolute, &self.config.backup_suffix);
        if let Err(err) = fs::copy(&absolute, &backup) {
            let mut rec = MutationRecord::new(MutationAction::Error, relative.to_path_buf());
            rec.detail = Some(format!("backup failed: {err}"));
            records.push(rec);
            return;
        }
        let mut backed_up = MutationRecord::new(MutationAction::BackedUp, relative.to_path_buf());
        backed_up.backup_path = Some(backup.clone());
        backed_up.hash_before = Some(hash_before.clone());
        records.push(backed_up);

        if let Err(err) = write_atomic(&absolute, stripped.as_bytes()) {
            let mut rec = MutationRecord::new(MutationAction::Error, relative.to_path_buf());
            rec.backup_path = Some(backup);
            rec.detail = Some(format!("write failed: {err}"));
            records.push(rec);
            return;
        }

        for rule_id in &applied {
            let mut rec = MutationRecord::new(MutationAction::Stripped, relative.to_path_buf());
            rec.rule_ids = vec![rule_id.clone()];
            records.push(rec);
        }

        let mut rec = MutationRecord::new(MutationAction::Sanitized, relative.to_path_buf());
        rec.backup_path = Some(backup);
        rec.hash_before = Some(hash_before);
        rec.hash_after = Some(sha256_hex(stripped.as_bytes()));
        rec.rule_ids = applied;
        records.push(rec);
    }
}

/// First unused backup path: `page.js.sanitize-bak`, then `.sanitize-bak.1`,
/// `.sanitize-bak.2` and so on. Existing backups are never overwritten.
fn next_backup_path(path: &Path, suffix: &str) -> PathBuf {
    let base = PathBuf::from(format!("{}.{suffix}", path.display()));
    if !base.exists() {
        return base;
    }
    let mut n: u32 = 1;
    loop {
        let candidate = PathBuf::from(format!("{}.{suffix}.{n}", path.display()));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Write through a sibling temp file and rename, so a failed write can never
/// leave the target truncated.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.warden-tmp"));
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}
