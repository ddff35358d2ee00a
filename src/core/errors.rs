//! AW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WardenError>;

/// Top-level error type for artifact_warden.
///
/// File-level scan and sanitize failures never surface here; they are folded
/// into `ReadError` violations and `Error` mutation records respectively.
/// Only run-level failures (policy load, ledger persistence, configuration)
/// travel through this enum.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("[AW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[AW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[AW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[AW-1101] policy load failure for {path}: {details}")]
    PolicyLoad { path: PathBuf, details: String },

    #[error("[AW-1102] unsupported policy schema version {found} (supported: {supported})")]
    PolicyVersion { found: u32, supported: u32 },

    #[error("[AW-1103] policy rule `{rule_id}` failed to compile: {details}")]
    PolicyRule { rule_id: String, details: String },

    #[error("[AW-2001] scan root is not a directory: {path}")]
    InvalidScanRoot { path: PathBuf },

    #[error("[AW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[AW-2201] ledger write failure at {path}: {details}")]
    LedgerWrite { path: PathBuf, details: String },

    #[error("[AW-2202] ledger chain integrity failure at entry {seq}: {details}")]
    LedgerChain { seq: u64, details: String },

    #[error("[AW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[AW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[AW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WardenError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "AW-1001",
            Self::MissingConfig { .. } => "AW-1002",
            Self::ConfigParse { .. } => "AW-1003",
            Self::PolicyLoad { .. } => "AW-1101",
            Self::PolicyVersion { .. } => "AW-1102",
            Self::PolicyRule { .. } => "AW-1103",
            Self::InvalidScanRoot { .. } => "AW-2001",
            Self::Serialization { .. } => "AW-2101",
            Self::LedgerWrite { .. } => "AW-2201",
            Self::LedgerChain { .. } => "AW-2202",
            Self::Io { .. } => "AW-3002",
            Self::ChannelClosed { .. } => "AW-3003",
            Self::Runtime { .. } => "AW-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::LedgerWrite { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
