//! Shared helpers for integration tests.

use std::fs;
use std::path::Path;

use artifact_warden::core::config::Config;

/// Config whose ledger and activity log live under `data_dir`.
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.ledger.path = data_dir.join("ledger.jsonl");
    config.log.path = data_dir.join("activity.jsonl");
    config
}

/// Create a file under `root`, creating parent directories as needed.
pub fn write_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}
