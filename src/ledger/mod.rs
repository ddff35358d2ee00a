//! Append-only, hash-chained run ledger.
//!
//! Every compliance run appends exactly one entry: the full report wrapped in
//! a chain envelope (sequence number, predecessor hash, entry hash). Entries
//! are JSONL, one per line, written with a single `write_all` under a process
//! lock. The ledger is never rewritten; verification replays the chain.

#![allow(missing_docs)]

pub mod chain;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WardenError};
use crate::sanitize::MutationRecord;
use crate::scanner::{MarkerAdvisory, Violation};
use self::chain::{GENESIS_HASH, chain_hash};

/// Final judgement of one compliance run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No violations detected.
    Clean,
    /// Violations were found and every eligible one was stripped.
    Sanitized,
    /// Non-sanitizable violations remain, or a mutation failed.
    Contaminated,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Sanitized => write!(f, "sanitized"),
            Self::Contaminated => write!(f, "contaminated"),
        }
    }
}

/// Complete record of one run: what was found, what was changed, the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub scan_root: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub policy_version: u32,
    pub files_scanned: usize,
    pub violations: Vec<Violation>,
    pub mutations: Vec<MutationRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<MarkerAdvisory>,
    pub verdict: Verdict,
}

/// A report wrapped in its chain envelope, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// 1-based position in the ledger.
    pub seq: u64,
    pub prev_hash: String,
    pub entry_hash: String,
    pub report: ComplianceReport,
}

/// Emitted when a root regresses: a prior clean or sanitized verdict followed
/// by a contaminated one means contamination recurred after remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContradictionRecord {
    pub scan_root: PathBuf,
    pub prior_seq: u64,
    pub prior_verdict: Verdict,
    pub current_seq: u64,
    pub current_verdict: Verdict,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSONL store with hash-chain integrity.
pub struct MutationLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MutationLedger {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one report, chaining it to the current tail. Returns the entry
    /// as written.
    pub fn append(&self, report: ComplianceReport) -> Result<LedgerEntry> {
        let _guard = self.lock.lock();

        let tail = self.read_entries()?.pop();
        let (seq, prev_hash) = match tail {
            Some(entry) => (entry.seq + 1, entry.entry_hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let payload = serde_json::to_string(&report)?;
        let entry = LedgerEntry {
            seq,
            prev_hash: prev_hash.clone(),
            entry_hash: chain_hash(seq, &prev_hash, payload.as_bytes()),
            report,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| WardenError::LedgerWrite {
                path: self.path.clone(),
                details: format!("cannot create parent directory: {e}"),
            })?;
        }

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WardenError::LedgerWrite {
                path: self.path.clone(),
                details: format!("cannot open for append: {e}"),
            })?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| WardenError::LedgerWrite {
                path: self.path.clone(),
                details: format!("append failed: {e}"),
            })?;

        Ok(entry)
    }

    /// All entries for one scan root, oldest first.
    pub fn history(&self, scan_root: &Path) -> Result<Vec<LedgerEntry>> {
        let _guard = self.lock.lock();
        Ok(self
            .read_entries()?
            .into_iter()
            .filter(|e| e.report.scan_root == scan_root)
            .collect())
    }

    /// Most recent entry for one scan root, if any.
    pub fn latest(&self, scan_root: &Path) -> Result<Option<LedgerEntry>> {
        Ok(self.history(scan_root)?.pop())
    }

    /// Replay the chain, failing on the first broken link. Returns the number
    /// of verified entries.
    pub fn verify(&self) -> Result<u64> {
        let _guard = self.lock.lock();
        let entries = self.read_entries()?;
        let mut prev_hash = GENESIS_HASH.to_string();
        let mut expected_seq = 1u64;

        for entry in &entries {
            if entry.seq != expected_seq {
                return Err(WardenError::LedgerChain {
                    seq: entry.seq,
                    details: format!("expected sequence {expected_seq}, found {}", entry.seq),
                });
            }
            if entry.prev_hash != prev_hash {
                return Err(WardenError::LedgerChain {
                    seq: entry.seq,
                    details: "predecessor hash mismatch".to_string(),
                });
            }
            let payload = serde_json::to_string(&entry.report)?;
            let recomputed = chain_hash(entry.seq, &entry.prev_hash, payload.as_bytes());
            if recomputed != entry.entry_hash {
                return Err(WardenError::LedgerChain {
                    seq: entry.seq,
                    details: "entry hash mismatch".to_string(),
                });
            }
            prev_hash = entry.entry_hash.clone();
            expected_seq += 1;
        }
        Ok(entries.len() as u64)
    }

    fn read_entries(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| WardenError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut entries = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: LedgerEntry =
                serde_json::from_str(line).map_err(|e| WardenError::LedgerChain {
                    seq: line_no as u64 + 1,
                    details: format!("unparseable entry: {e}"),
                })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report(root: &str, verdict: Verdict) -> ComplianceReport {
        ComplianceReport {
            scan_root: PathBuf::from(root),
            timestamp: Utc::now(),
            policy_version: 1,
            files_scanned: 0,
            violations: Vec::new(),
            mutations: Vec::new(),
            advisories: Vec::new(),
            verdict,
        }
    }

    #[test]
    fn first_entry_chains_from_genesis() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("ledger.jsonl"));
        let entry = ledger.append(report("/a", Verdict::Clean)).unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn entries_chain_and_verify() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("ledger.jsonl"));
        let first = ledger.append(report("/a", Verdict::Clean)).unwrap();
        let second = ledger.append(report("/a", Verdict::Contaminated)).unwrap();

        assert_eq!(second.seq, 2);
        assert_eq!(second.prev_hash, first.entry_hash);
        assert_eq!(ledger.verify().unwrap(), 2);
    }

    #[test]
    fn tampering_is_detected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.jsonl");
        let ledger = MutationLedger::new(&path);
        ledger.append(report("/a", Verdict::Clean)).unwrap();
        ledger.append(report("/a", Verdict::Clean)).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let tampered = raw.replacen("\"verdict\":\"clean\"", "\"verdict\":\"sanitized\"", 1);
        fs::write(&path, tampered).unwrap();

        let err = ledger.verify().unwrap_err();
        assert_eq!(err.code(), "AW-2202");
    }

    #[test]
    fn history_filters_by_root() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("ledger.jsonl"));
        ledger.append(report("/a", Verdict::Clean)).unwrap();
        ledger.append(report("/b", Verdict::Contaminated)).unwrap();
        ledger.append(report("/a", Verdict::Sanitized)).unwrap();

        let history = ledger.history(Path::new("/a")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].report.verdict, Verdict::Clean);
        assert_eq!(history[1].report.verdict, Verdict::Sanitized);

        let latest = ledger.latest(Path::new("/a")).unwrap().unwrap();
        assert_eq!(latest.report.verdict, Verdict::Sanitized);
        assert!(ledger.latest(Path::new("/c")).unwrap().is_none());
    }

    #[test]
    fn missing_ledger_verifies_empty() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("absent.jsonl"));
        assert_eq!(ledger.verify().unwrap(), 0);
        assert!(ledger.history(Path::new("/a")).unwrap().is_empty());
    }

    #[test]
    fn parent_directories_are_created() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("deep/nested/ledger.jsonl"));
        ledger.append(report("/a", Verdict::Clean)).unwrap();
        assert!(ledger.path().exists());
    }

    #[test]
    fn entry_round_trips_through_json() {
        let tmp = TempDir::new().unwrap();
        let ledger = MutationLedger::new(tmp.path().join("ledger.jsonl"));
        let written = ledger.append(report("/a", Verdict::Sanitized)).unwrap();
        let read_back = ledger.history(Path::new("/a")).unwrap().pop().unwrap();
        assert_eq!(written, read_back);
    }
}
