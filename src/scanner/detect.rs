//! Violation detection: applies the policy to every enumerated file.
//!
//! Inspections are independent per file and fan out across worker threads;
//! per-file results are merged and sorted by relative path afterwards so the
//! violation sequence is deterministic for a fixed tree and policy. Within one
//! file, pattern violations follow policy rule order.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel as channel;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::policy::{Policy, Severity, json_key_present};
use crate::scanner::walker::{DirectoryWalker, FileEntry, WalkerConfig};

/// Kind of detected non-compliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ForbiddenFile,
    ForbiddenPattern,
    ForbiddenConfigKey,
    ReadError,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForbiddenFile => write!(f, "forbidden_file"),
            Self::ForbiddenPattern => write!(f, "forbidden_pattern"),
            Self::ForbiddenConfigKey => write!(f, "forbidden_config_key"),
            Self::ReadError => write!(f, "read_error"),
        }
    }
}

/// One detected non-compliance instance. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Path of the offending artifact, relative to the scan root.
    pub path: PathBuf,
    pub severity: Severity,
    /// Matched rule identifier, forbidden token, or error message.
    pub detail: String,
}

/// Missing required markers in a marker-expecting config file.
///
/// Advisories are validation-only: they are logged for the operator but are
/// neither violations nor sanitization candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerAdvisory {
    pub path: PathBuf,
    pub missing: Vec<String>,
}

/// Result of one scan pass over a root.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Violations sorted by relative path; rule order within a file.
    pub violations: Vec<Violation>,
    pub advisories: Vec<MarkerAdvisory>,
    pub files_scanned: usize,
}

/// Scanner tuning, a subset of the full config.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_depth: usize,
    pub follow_symlinks: bool,
    pub parallelism: usize,
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        let cfg = crate::core::config::ScannerConfig::default();
        Self {
            max_depth: cfg.max_depth,
            follow_symlinks: cfg.follow_symlinks,
            parallelism: cfg.parallelism,
            max_file_bytes: cfg.max_file_bytes,
        }
    }
}

impl From<&crate::core::config::ScannerConfig> for ScanOptions {
    fn from(cfg: &crate::core::config::ScannerConfig) -> Self {
        Self {
            max_depth: cfg.max_depth,
            follow_symlinks: cfg.follow_symlinks,
            parallelism: cfg.parallelism,
            max_file_bytes: cfg.max_file_bytes,
        }
    }
}

/// Applies one policy to one tree. Performs no mutation; safe to call
/// repeatedly against the same root and concurrently against different roots.
pub struct ArtifactScanner<'p> {
    policy: &'p Policy,
    options: ScanOptions,
}

impl<'p> ArtifactScanner<'p> {
    pub fn new(policy: &'p Policy, options: ScanOptions) -> Self {
        Self { policy, options }
    }

    /// Walk `root` and inspect every regular file against the policy.
    pub fn scan(&self, root: &std::path::Path) -> Result<ScanOutcome> {
        let walker = DirectoryWalker::new(
            root,
            WalkerConfig {
                max_depth: self.options.max_depth,
                follow_symlinks: self.options.follow_symlinks,
                parallelism: self.options.parallelism,
            },
        );
        let entries = walker.walk()?;
        let files_scanned = entries.len();

        let parallelism = self.options.parallelism.max(1);
        let (work_tx, work_rx) = channel::unbounded::<FileEntry>();
        let (result_tx, result_rx) =
            channel::unbounded::<(PathBuf, Vec<Violation>, Option<MarkerAdvisory>)>();

        for entry in entries {
            let _ = work_tx.send(entry);
        }
        drop(work_tx);

        let mut per_file: Vec<(PathBuf, Vec<Violation>, Option<MarkerAdvisory>)> =
            thread::scope(|scope| {
                for _ in 0..parallelism {
                    let work_rx = work_rx.clone();
                    let result_tx = result_tx.clone();
                    let policy = self.policy;
                    let max_file_bytes = self.options.max_file_bytes;
                    scope.spawn(move || {
                        while let Ok(entry) = work_rx.recv() {
                            let (violations, advisory) =
                                inspect_file(policy, &entry, max_file_bytes);
                            let _ = result_tx.send((entry.relative, violations, advisory));
                        }
                    });
                }
                drop(result_tx);
                result_rx.into_iter().collect()
            });

        // Fan-in merge: per-file order is already rule order; sorting by path
        // restores global determinism after the parallel fan-out.
        per_file.sort_by(|a, b| a.0.cmp(&b.0));

        let mut outcome = ScanOutcome {
            files_scanned,
            ..ScanOutcome::default()
        };
        for (_, violations, advisory) in per_file {
            outcome.violations.extend(violations);
            if let Some(advisory) = advisory {
                outcome.advisories.push(advisory);
            }
        }
        Ok(outcome)
    }
}

/// Inspect a single file against all applicable policy dimensions.
///
/// A file may yield several violations: one per matched pattern rule, plus
/// name and config-key findings. Read failures become `ReadError` violations
/// and never abort the scan.
fn inspect_file(
    policy: &Policy,
    entry: &FileEntry,
    max_file_bytes: u64,
) -> (Vec<Violation>, Option<MarkerAdvisory>) {
    let mut violations = Vec::new();
    let mut advisory = None;

    if let Some(token) = policy.forbidden_name_match(&entry.relative) {
        violations.push(Violation {
            kind: ViolationKind::ForbiddenFile,
            path: entry.relative.clone(),
            severity: Severity::Critical,
            detail: token,
        });
    }

    let wants_text = policy.is_text_source(&entry.relative);
    let wants_structured = policy.is_structured_data(&entry.relative);
    let wants_markers = policy.expects_markers(&entry.relative);
    if !wants_text && !wants_structured && !wants_markers {
        return (violations, advisory);
    }

    if entry.size_bytes > max_file_bytes {
        violations.push(Violation {
            kind: ViolationKind::ReadError,
            path: entry.relative.clone(),
            severity: Severity::Medium,
            detail: format!(
                "file size {} exceeds scan budget of {max_file_bytes} bytes",
                entry.size_bytes
            ),
        });
        return (violations, advisory);
    }

    let bytes = match fs::read(&entry.absolute) {
        Ok(bytes) => bytes,
        Err(err) => {
            violations.push(Violation {
                kind: ViolationKind::ReadError,
                path: entry.relative.clone(),
                severity: Severity::Medium,
                detail: err.to_string(),
            });
            return (violations, advisory);
        }
    };

    if wants_text || wants_markers {
        match decode_text(&bytes) {
            Ok(text) => {
                if wants_text {
                    for rule in policy.rules() {
                        if rule.is_match(text) {
                            violations.push(Violation {
                                kind: ViolationKind::ForbiddenPattern,
                                path: entry.relative.clone(),
                                severity: rule.severity(),
                                detail: rule.id().to_string(),
                            });
                        }
                    }
                }
                if wants_markers {
                    let missing = policy.missing_markers(text);
                    if !missing.is_empty() {
                        advisory = Some(MarkerAdvisory {
                            path: entry.relative.clone(),
                            missing,
                        });
                    }
                }
            }
            Err(detail) => {
                violations.push(Violation {
                    kind: ViolationKind::ReadError,
                    path: entry.relative.clone(),
                    severity: Severity::Medium,
                    detail,
                });
            }
        }
    }

    if wants_structured
        && let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes)
    {
        // Files that fail to parse are simply not structured data; only a
        // resolvable forbidden key is a violation.
        for key in policy.forbidden_config_keys() {
            if json_key_present(&value, key) {
                violations.push(Violation {
                    kind: ViolationKind::ForbiddenConfigKey,
                    path: entry.relative.clone(),
                    severity: Severity::High,
                    detail: key.clone(),
                });
            }
        }
    }

    (violations, advisory)
}

/// Decode bytes as UTF-8 text, rejecting binary payloads early.
fn decode_text(bytes: &[u8]) -> std::result::Result<&str, String> {
    // NUL sniff on the leading window: a text-source extension over binary
    // content is an encoding violation, not a pattern-scan candidate.
    let window = &bytes[..bytes.len().min(4096)];
    if memchr::memchr(0, window).is_some() {
        return Err("binary content in text-source file".to_string());
    }
    std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn scan(root: &Path) -> ScanOutcome {
        let policy = Policy::static_export();
        ArtifactScanner::new(&policy, ScanOptions::default())
            .scan(root)
            .unwrap()
    }

    #[test]
    fn empty_tree_is_clean() {
        let tmp = TempDir::new().unwrap();
        let outcome = scan(tmp.path());
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.files_scanned, 0);
    }

    #[test]
    fn forbidden_directory_marker_is_critical() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("api")).unwrap();
        fs::write(tmp.path().join("api/handler.js"), "module.exports = {}").unwrap();

        let outcome = scan(tmp.path());
        let v = outcome
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ForbiddenFile)
            .unwrap();
        assert_eq!(v.path, PathBuf::from("api/handler.js"));
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.detail, "api/");
    }

    #[test]
    fn pattern_match_emits_one_violation_per_rule() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("page.js"),
            "export async function getServerSideProps() {}\n\
             export async function getStaticPaths() {}\n",
        )
        .unwrap();

        let outcome = scan(tmp.path());
        let ids: Vec<&str> = outcome
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::ForbiddenPattern)
            .map(|v| v.detail.as_str())
            .collect();
        assert_eq!(ids, vec!["server-side-props", "static-paths"]);
    }

    #[test]
    fn forbidden_config_key_in_json() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("manifest.json"),
            r#"{"experimental":{"serverActions":true},"images":{}}"#,
        )
        .unwrap();

        let outcome = scan(tmp.path());
        let v = outcome
            .violations
            .iter()
            .find(|v| v.kind == ViolationKind::ForbiddenConfigKey)
            .unwrap();
        assert_eq!(v.detail, "experimental.serverActions");
        assert_eq!(v.severity, Severity::High);
    }

    #[test]
    fn unparseable_json_is_not_a_violation() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        let outcome = scan(tmp.path());
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn binary_text_source_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("blob.js"), b"\x00\x01\x02binary").unwrap();

        let outcome = scan(tmp.path());
        assert_eq!(outcome.violations.len(), 1);
        let v = &outcome.violations[0];
        assert_eq!(v.kind, ViolationKind::ReadError);
        assert_eq!(v.severity, Severity::Medium);
    }

    #[test]
    fn read_error_does_not_abort_scan() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.js"), b"\x00").unwrap();
        fs::write(tmp.path().join("page.js"), "getServerSideProps").unwrap();

        let outcome = scan(tmp.path());
        assert!(
            outcome
                .violations
                .iter()
                .any(|v| v.kind == ViolationKind::ReadError)
        );
        assert!(
            outcome
                .violations
                .iter()
                .any(|v| v.kind == ViolationKind::ForbiddenPattern)
        );
    }

    #[test]
    fn oversized_file_is_budgeted_out() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("huge.js"), "getServerSideProps".repeat(10)).unwrap();

        let policy = Policy::static_export();
        let options = ScanOptions {
            max_file_bytes: 8,
            ..ScanOptions::default()
        };
        let outcome = ArtifactScanner::new(&policy, options).scan(tmp.path()).unwrap();
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].kind, ViolationKind::ReadError);
    }

    #[test]
    fn non_source_extensions_are_skipped() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("readme.txt"), "getServerSideProps").unwrap();
        let outcome = scan(tmp.path());
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn scan_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("api")).unwrap();
        fs::write(tmp.path().join("api/h.js"), "x").unwrap();
        fs::write(tmp.path().join("page.js"), "getInitialProps").unwrap();
        fs::write(tmp.path().join("cfg.json"), r#"{"api":{}}"#).unwrap();

        let first = scan(tmp.path());
        let second = scan(tmp.path());
        assert_eq!(first.violations, second.violations);
    }

    #[test]
    fn violations_are_ordered_by_path() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("z.js"), "getStaticProps").unwrap();
        fs::write(tmp.path().join("a.js"), "getStaticProps").unwrap();
        fs::create_dir_all(tmp.path().join("m")).unwrap();
        fs::write(tmp.path().join("m/mid.js"), "getStaticProps").unwrap();

        let outcome = scan(tmp.path());
        let paths: Vec<_> = outcome.violations.iter().map(|v| v.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }

    #[test]
    fn marker_advisory_for_config_without_markers() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("next.config.js"), "module.exports = {}").unwrap();

        let outcome = scan(tmp.path());
        assert_eq!(outcome.advisories.len(), 1);
        assert_eq!(outcome.advisories[0].path, PathBuf::from("next.config.js"));
        assert_eq!(outcome.advisories[0].missing.len(), 3);
    }

    #[test]
    fn compliant_marker_file_has_no_advisory() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("next.config.js"),
            "module.exports = { output: 'export', distDir: 'out', images: { unoptimized: true } }",
        )
        .unwrap();

        let outcome = scan(tmp.path());
        assert!(outcome.advisories.is_empty());
    }
}
