#![forbid(unsafe_code)]

//! Artifact Warden — compliance scanner and sanitizer for build artifact trees.
//!
//! A run walks one artifact tree against a declarative policy, in two phases:
//! 1. **Detect** — forbidden file names, forbidden text patterns, forbidden
//!    config keys (read-only, parallel)
//! 2. **Sanitize** — strip forbidden pattern spans from text sources, always
//!    backing the file up first
//!
//! Every run is recorded in a hash-chained, append-only ledger; a root that
//! regresses from clean to contaminated additionally yields a contradiction
//! record.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use artifact_warden::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use artifact_warden::policy::Policy;
//! use artifact_warden::scanner::{ArtifactScanner, ScanOptions};
//! ```

pub mod prelude;

pub mod core;
pub mod ledger;
pub mod logger;
pub mod orchestrator;
pub mod policy;
pub mod sanitize;
pub mod scanner;
