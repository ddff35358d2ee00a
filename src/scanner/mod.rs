//! Read-only artifact scanning: tree walk plus per-file policy inspection.

pub mod detect;
pub mod walker;

pub use self::detect::{
    ArtifactScanner, MarkerAdvisory, ScanOptions, ScanOutcome, Violation, ViolationKind,
};
pub use self::walker::{DirectoryWalker, FileEntry, WalkerConfig};
