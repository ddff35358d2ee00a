//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WardenError};

/// Full warden configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub sanitizer: SanitizerConfig,
    pub ledger: LedgerConfig,
    pub log: LogConfig,
    pub paths: PathsConfig,
}

/// Scan traversal constraints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Maximum directory depth below the scan root.
    pub max_depth: usize,
    /// Worker threads for the file-inspection fan-out.
    pub parallelism: usize,
    /// Follow symlinks whose targets stay under the scan root.
    /// Links escaping the root are never followed regardless of this flag.
    pub follow_symlinks: bool,
    /// Maximum bytes read per file before the inspector gives up on it.
    pub max_file_bytes: u64,
}

/// Sanitizer behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Suffix appended to backup copies (`page.js` → `page.js.sanitize-bak`).
    pub backup_suffix: String,
    /// When true, report what would change without touching any file.
    pub dry_run: bool,
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path of the hash-chained JSONL ledger file.
    pub path: PathBuf,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Path of the JSONL activity log.
    pub path: PathBuf,
    /// Maximum file size before rotation (bytes).
    pub max_size_bytes: u64,
    /// Number of rotated files to keep.
    pub max_rotated_files: u32,
}

/// Filesystem paths used by warden itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

fn data_dir() -> PathBuf {
    let home_dir = env::var_os("HOME").map_or_else(
        || {
            eprintln!("[AW-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    );
    home_dir.join(".local").join("share").join("warden")
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            parallelism: std::thread::available_parallelism()
                .map_or(2, |n| n.get().saturating_div(2).max(1)),
            follow_symlinks: false,
            max_file_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            backup_suffix: "sanitize-bak".to_string(),
            dry_run: false,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("ledger.jsonl"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("activity.jsonl"),
            max_size_bytes: 100 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            config_file: home_dir
                .join(".config")
                .join("warden")
                .join("config.toml"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from the default path;
    /// defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| WardenError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(WardenError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_usize("WARDEN_SCANNER_MAX_DEPTH", &mut self.scanner.max_depth)?;
        set_env_usize("WARDEN_SCANNER_PARALLELISM", &mut self.scanner.parallelism)?;
        set_env_bool(
            "WARDEN_SCANNER_FOLLOW_SYMLINKS",
            &mut self.scanner.follow_symlinks,
        )?;
        set_env_u64(
            "WARDEN_SCANNER_MAX_FILE_BYTES",
            &mut self.scanner.max_file_bytes,
        )?;

        if let Ok(raw) = env::var("WARDEN_SANITIZER_BACKUP_SUFFIX") {
            self.sanitizer.backup_suffix = raw;
        }
        set_env_bool("WARDEN_SANITIZER_DRY_RUN", &mut self.sanitizer.dry_run)?;

        if let Ok(raw) = env::var("WARDEN_LEDGER_PATH") {
            self.ledger.path = PathBuf::from(raw);
        }
        if let Ok(raw) = env::var("WARDEN_LOG_PATH") {
            self.log.path = PathBuf::from(raw);
        }
        set_env_u64("WARDEN_LOG_MAX_SIZE_BYTES", &mut self.log.max_size_bytes)?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.scanner.max_depth == 0 {
            return Err(WardenError::InvalidConfig {
                details: "scanner.max_depth must be >= 1".to_string(),
            });
        }
        if self.scanner.parallelism == 0 {
            return Err(WardenError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.sanitizer.backup_suffix.is_empty() {
            return Err(WardenError::InvalidConfig {
                details: "sanitizer.backup_suffix must not be empty".to_string(),
            });
        }
        if self.sanitizer.backup_suffix.contains('/') {
            return Err(WardenError::InvalidConfig {
                details: "sanitizer.backup_suffix must not contain path separators".to_string(),
            });
        }
        Ok(())
    }
}

fn set_env_u64(name: &str, slot: &mut u64) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *slot = raw.parse().map_err(|_| WardenError::InvalidConfig {
            details: format!("{name} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}

fn set_env_usize(name: &str, slot: &mut usize) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *slot = raw.parse().map_err(|_| WardenError::InvalidConfig {
            details: format!("{name} must be an unsigned integer, got {raw:?}"),
        })?;
    }
    Ok(())
}

fn set_env_bool(name: &str, slot: &mut bool) -> Result<()> {
    if let Ok(raw) = env::var(name) {
        *slot = match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                return Err(WardenError::InvalidConfig {
                    details: format!("{name} must be a boolean, got {raw:?}"),
                });
            }
        };
    }
    Ok(())
}
