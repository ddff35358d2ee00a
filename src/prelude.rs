//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use artifact_warden::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, WardenError};

// Policy
pub use crate::policy::{Policy, PolicyDocument, Severity};

// Scanner
pub use crate::scanner::{ArtifactScanner, ScanOptions, ScanOutcome, Violation, ViolationKind};

// Sanitizer
pub use crate::sanitize::{MutationAction, MutationRecord, Sanitizer};

// Ledger
pub use crate::ledger::{
    ComplianceReport, ContradictionRecord, LedgerEntry, MutationLedger, Verdict,
};

// Orchestrator
pub use crate::orchestrator::{LedgerStatus, Orchestrator, RunOutcome, RunState};
