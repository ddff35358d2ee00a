//! Run orchestration: scan, sanitize, record, and track recurrence.
//!
//! A run moves through a fixed state machine:
//!
//! ```text
//! Idle -> Scanning -> Clean                    (no violations)
//!                  -> Sanitizing -> Sanitized  (all eligible spans stripped)
//!                               -> Contaminated
//! ```
//!
//! The verdict is `Contaminated` when non-sanitizable violations remain
//! (forbidden files or config keys) or when any mutation failed. Every
//! non-dry run appends exactly one ledger entry; a clean-then-contaminated
//! regression of the same root additionally yields a contradiction record.

#![allow(missing_docs)]

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::ledger::{
    ComplianceReport, ContradictionRecord, LedgerEntry, MutationLedger, Verdict,
};
use crate::logger::{EventType, JsonlConfig, JsonlWriter, Level, LogEntry};
use crate::policy::Policy;
use crate::sanitize::{MutationAction, MutationRecord, Sanitizer};
use crate::scanner::{ArtifactScanner, ScanOptions, Violation, ViolationKind};

/// Orchestrator state, observable between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Scanning,
    Sanitizing,
    Clean,
    Sanitized,
    Contaminated,
}

/// Whether the run made it into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Appended as the entry with this sequence number.
    Recorded { seq: u64 },
    /// Dry-run: nothing was mutated, so nothing was recorded.
    Skipped,
    /// Append failed; the report is still returned to the caller.
    Failed { details: String },
}

/// Everything a caller needs from one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: ComplianceReport,
    pub ledger_status: LedgerStatus,
    pub contradiction: Option<ContradictionRecord>,
}

/// Drives the full detect/sanitize/record pipeline for one root at a time.
pub struct Orchestrator<'p> {
    policy: &'p Policy,
    config: Config,
    ledger: MutationLedger,
    log: JsonlWriter,
    state: RunState,
}

impl<'p> Orchestrator<'p> {
    #[must_use]
    pub fn new(policy: &'p Policy, config: Config) -> Self {
        let ledger = MutationLedger::new(config.ledger.path.clone());
        let log = JsonlWriter::open(JsonlConfig::from(&config.log));
        Self {
            policy,
            config,
            ledger,
            log,
            state: RunState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn ledger(&self) -> &MutationLedger {
        &self.ledger
    }

    /// Execute one full compliance run against `root`.
    ///
    /// Fails only when the scan itself cannot start (bad root, walk failure).
    /// Per-file problems become violations or error mutations instead.
    pub fn run(&mut self, root: &Path) -> Result<RunOutcome> {
        let started = Instant::now();
        let timestamp = Utc::now();
        self.state = RunState::Scanning;
        self.log.write_entry(
            &LogEntry::new(EventType::RunStarted, Level::Info).scan_root(root),
        );

        let scanner = ArtifactScanner::new(self.policy, ScanOptions::from(&self.config.scanner));
        let scan = match scanner.scan(root) {
            Ok(scan) => scan,
            Err(err) => {
                self.state = RunState::Idle;
                let mut entry = LogEntry::new(EventType::RunCompleted, Level::Critical)
                    .scan_root(root);
                entry.error_code = Some(err.code().to_string());
                entry.error_message = Some(err.to_string());
                self.log.write_entry(&entry);
                return Err(err);
            }
        };

        let mut entry =
            LogEntry::new(EventType::ScanCompleted, Level::Info).scan_root(root);
        entry.files_scanned = Some(scan.files_scanned);
        entry.violations = Some(scan.violations.len());
        self.log.write_entry(&entry);

        for advisory in &scan.advisories {
            let mut entry =
                LogEntry::new(EventType::MarkersMissing, Level::Warning).scan_root(root);
            entry.path = Some(advisory.path.display().to_string());
            entry.details = Some(advisory.missing.join(", "));
            self.log.write_entry(&entry);
        }

        let mutations = if scan.violations.is_empty() {
            Vec::new()
        } else {
            self.state = RunState::Sanitizing;
            let sanitizer = Sanitizer::new(self.policy, self.config.sanitizer.clone());
            let records = sanitizer.sanitize(root, &scan.violations);
            self.log_mutations(root, &records);
            records
        };

        let verdict = decide_verdict(&scan.violations, &mutations);
        let report = ComplianceReport {
            scan_root: root.to_path_buf(),
            timestamp,
            policy_version: self.policy.version(),
            files_scanned: scan.files_scanned,
            violations: scan.violations,
            mutations,
            advisories: scan.advisories,
            verdict,
        };

        let (ledger_status, contradiction) = if self.config.sanitizer.dry_run {
            (LedgerStatus::Skipped, None)
        } else {
            self.record(&report)
        };

        if let Some(contradiction) = &contradiction {
            let mut entry =
                LogEntry::new(EventType::Contradiction, Level::Critical).scan_root(root);
            entry.ledger_seq = Some(contradiction.current_seq);
            entry.details = Some(format!(
                "verdict {} at seq {} regressed to contaminated",
                contradiction.prior_verdict, contradiction.prior_seq
            ));
            self.log.write_entry(&entry);
        }

        self.state = match verdict {
            Verdict::Clean => RunState::Clean,
            Verdict::Sanitized => RunState::Sanitized,
            Verdict::Contaminated => RunState::Contaminated,
        };

        let mut entry = LogEntry::new(EventType::RunCompleted, Level::Info).scan_root(root);
        entry.verdict = Some(verdict.to_string());
        entry.violations = Some(report.violations.len());
        entry.duration_ms = Some(started.elapsed().as_millis().try_into().unwrap_or(u64::MAX));
        if let LedgerStatus::Recorded { seq } = ledger_status {
            entry.ledger_seq = Some(seq);
        }
        self.log.write_entry(&entry);
        self.log.flush();

        Ok(RunOutcome {
            report,
            ledger_status,
            contradiction,
        })
    }

    fn log_mutations(&mut self, root: &Path, records: &[MutationRecord]) {
        for record in records {
            let (event, level) = match record.action {
                MutationAction::Sanitized => (EventType::FileSanitized, Level::Info),
                MutationAction::Error => (EventType::SanitizeFailed, Level::Critical),
                MutationAction::BackedUp
                | MutationAction::Stripped
                | MutationAction::NoOp => continue,
            };
            let mut entry = LogEntry::new(event, level).scan_root(root);
            entry.path = Some(record.path.display().to_string());
            if !record.rule_ids.is_empty() {
                entry.rule_ids = Some(record.rule_ids.clone());
            }
            entry.error_message.clone_from(&record.detail);
            self.log.write_entry(&entry);
        }
    }

    /// Append the report and check for a regression against the prior entry.
    fn record(
        &mut self,
        report: &ComplianceReport,
    ) -> (LedgerStatus, Option<ContradictionRecord>) {
        let prior = match self.ledger.latest(&report.scan_root) {
            Ok(prior) => prior,
            Err(err) => {
                self.log_ledger_error(&err);
                return (
                    LedgerStatus::Failed {
                        details: err.to_string(),
                    },
                    None,
                );
            }
        };

        let entry = match self.ledger.append(report.clone()) {
            Ok(entry) => entry,
            Err(err) => {
                self.log_ledger_error(&err);
                return (
                    LedgerStatus::Failed {
                        details: err.to_string(),
                    },
                    None,
                );
            }
        };

        let contradiction = contradiction_for(prior.as_ref(), &entry);
        (LedgerStatus::Recorded { seq: entry.seq }, contradiction)
    }

    fn log_ledger_error(&mut self, err: &crate::core::errors::WardenError) {
        let mut entry = LogEntry::new(EventType::LedgerError, Level::Critical);
        entry.error_code = Some(err.code().to_string());
        entry.error_message = Some(err.to_string());
        self.log.write_entry(&entry);
    }
}

/// Verdict rules: forbidden files and config keys cannot be sanitized, and a
/// failed mutation means the tree cannot be vouched for.
fn decide_verdict(violations: &[Violation], mutations: &[MutationRecord]) -> Verdict {
    if violations.is_empty() {
        return Verdict::Clean;
    }
    let unresolvable = violations.iter().any(|v| {
        matches!(
            v.kind,
            ViolationKind::ForbiddenFile | ViolationKind::ForbiddenConfigKey
        )
    });
    let mutation_failed = mutations
        .iter()
        .any(|m| m.action == MutationAction::Error);
    if unresolvable || mutation_failed {
        Verdict::Contaminated
    } else {
        Verdict::Sanitized
    }
}

/// A contradiction exists when the root was previously vouched for (clean or
/// sanitized) and is now contaminated again.
fn contradiction_for(
    prior: Option<&LedgerEntry>,
    current: &LedgerEntry,
) -> Option<ContradictionRecord> {
    let prior = prior?;
    if current.report.verdict != Verdict::Contaminated {
        return None;
    }
    match prior.report.verdict {
        Verdict::Clean | Verdict::Sanitized => Some(ContradictionRecord {
            scan_root: current.report.scan_root.clone(),
            prior_seq: prior.seq,
            prior_verdict: prior.report.verdict,
            current_seq: current.seq,
            current_verdict: current.report.verdict,
            timestamp: Utc::now(),
        }),
        Verdict::Contaminated => None,
    }
}
