//! Parallel directory walker with symlink containment.
//!
//! The walker is the "eyes" of the scanner: it enumerates the regular files
//! under one scan root so the detector can inspect each of them. Traversal is
//! fanned out over a crossbeam work queue; results are merged and sorted by
//! relative path so a fixed tree always yields the same file order.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::errors::{Result, WardenError};

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub max_depth: usize,
    /// Follow symlinks whose canonical target stays under the scan root.
    /// Links escaping the root are never followed.
    pub follow_symlinks: bool,
    pub parallelism: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            follow_symlinks: false,
            parallelism: 2,
        }
    }
}

/// A regular file discovered during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute (root-joined) path, used for I/O.
    pub absolute: PathBuf,
    /// Path relative to the scan root, used for reporting.
    pub relative: PathBuf,
    pub size_bytes: u64,
}

/// Item in the internal work queue: (directory_path, depth).
type WorkItem = (PathBuf, usize);

/// Parallel file enumerator for one scan root.
///
/// Safety invariants:
/// - Never follows a symlink whose target escapes the root
/// - Bounded by `max_depth` to prevent runaway traversal
/// - Performs no mutation; repeated walks of an unchanged tree are identical
pub struct DirectoryWalker {
    root: PathBuf,
    config: WalkerConfig,
}

impl DirectoryWalker {
    pub fn new(root: impl Into<PathBuf>, config: WalkerConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Enumerate all regular files under the root, sorted by relative path.
    pub fn walk(&self) -> Result<Vec<FileEntry>> {
        let meta =
            fs::symlink_metadata(&self.root).map_err(|source| WardenError::Io {
                path: self.root.clone(),
                source,
            })?;
        if !meta.is_dir() {
            return Err(WardenError::InvalidScanRoot {
                path: self.root.clone(),
            });
        }

        // Canonical root anchors the symlink containment check. If the root
        // itself cannot be canonicalized, fall back to the literal path.
        let canonical_root = Arc::new(
            fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone()),
        );

        let parallelism = self.config.parallelism.max(1);
        // The work queue must be unbounded: workers both consume and produce
        // items, so a bounded queue can fill with pending directories until
        // every worker is stuck in `send` and none is left to drain it.
        let (work_tx, work_rx) = channel::unbounded::<WorkItem>();
        let (result_tx, result_rx) = channel::unbounded::<FileEntry>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        in_flight.fetch_add(1, Ordering::Release);
        work_tx
            .send((self.root.clone(), 0))
            .map_err(|_| WardenError::ChannelClosed {
                component: "walker-seed",
            })?;

        let mut handles = Vec::with_capacity(parallelism);
        for _ in 0..parallelism {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let result_tx = result_tx.clone();
            let in_flight = Arc::clone(&in_flight);
            let config = self.config.clone();
            let root = self.root.clone();
            let canonical_root = Arc::clone(&canonical_root);

            handles.push(thread::spawn(move || {
                walker_thread(
                    &work_rx,
                    &work_tx,
                    &result_tx,
                    &in_flight,
                    &config,
                    &root,
                    &canonical_root,
                );
            }));
        }
        drop(work_tx);
        drop(result_tx);

        let mut entries: Vec<FileEntry> = result_rx.into_iter().collect();
        for handle in handles {
            let _ = handle.join();
        }

        // Deterministic order for reproducible violation sequences.
        entries.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(entries)
    }
}

fn walker_thread(
    work_rx: &channel::Receiver<WorkItem>,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<FileEntry>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    root: &Path,
    canonical_root: &Path,
) {
    loop {
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((dir_path, depth)) => {
                process_directory(
                    &dir_path,
                    depth,
                    work_tx,
                    result_tx,
                    in_flight,
                    config,
                    root,
                    canonical_root,
                );
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            Err(channel::RecvTimeoutError::Timeout) => {
                if in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
            }
            Err(channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Process one directory: emit file entries, enqueue subdirectories.
#[allow(clippy::too_many_arguments)]
fn process_directory(
    dir_path: &Path,
    depth: usize,
    work_tx: &channel::Sender<WorkItem>,
    result_tx: &channel::Sender<FileEntry>,
    in_flight: &AtomicUsize,
    config: &WalkerConfig,
    root: &Path,
    canonical_root: &Path,
) {
    // Unreadable directories are skipped, never fatal: the detector reports
    // unreadable *files*; a vanished or permission-blocked directory simply
    // contributes nothing to the scan.
    let entries = match fs::read_dir(dir_path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::PermissionDenied => return,
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(_) => return,
    };

    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let child_path = entry.path();
        let Ok(ft) = entry.file_type() else {
            continue;
        };

        let (is_dir, is_file) = if ft.is_symlink() {
            if !config.follow_symlinks || !link_stays_inside(&child_path, canonical_root) {
                continue;
            }
            match fs::metadata(&child_path) {
                Ok(meta) => (meta.is_dir(), meta.is_file()),
                Err(_) => continue, // dangling link
            }
        } else {
            (ft.is_dir(), ft.is_file())
        };

        if is_dir {
            if depth < config.max_depth {
                in_flight.fetch_add(1, Ordering::Release);
                if work_tx.send((child_path, depth + 1)).is_err() {
                    in_flight.fetch_sub(1, Ordering::Release);
                }
            }
            continue;
        }

        if !is_file {
            continue; // fifos, sockets, devices
        }

        let size_bytes = entry.metadata().map_or(0, |m| m.len());
        let relative = child_path
            .strip_prefix(root)
            .map_or_else(|_| child_path.clone(), Path::to_path_buf);
        let _ = result_tx.send(FileEntry {
            absolute: child_path,
            relative,
            size_bytes,
        });
    }
}

/// Containment check: a symlink is only followed when its canonical target
/// remains under the canonical scan root.
fn link_stays_inside(link: &Path, canonical_root: &Path) -> bool {
    fs::canonicalize(link).is_ok_and(|target| target.starts_with(canonical_root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn walk_all(root: &Path) -> Vec<FileEntry> {
        DirectoryWalker::new(root, WalkerConfig::default())
            .walk()
            .unwrap()
    }

    #[test]
    fn walks_nested_tree_and_sorts_by_relative_path() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("b/inner")).unwrap();
        fs::write(tmp.path().join("b/inner/deep.js"), "x").unwrap();
        fs::write(tmp.path().join("a.js"), "x").unwrap();
        fs::write(tmp.path().join("z.js"), "x").unwrap();

        let entries = walk_all(tmp.path());
        let rel: Vec<_> = entries.iter().map(|e| e.relative.clone()).collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a.js"),
                PathBuf::from("b/inner/deep.js"),
                PathBuf::from("z.js"),
            ]
        );
    }

    #[test]
    fn empty_directory_yields_no_entries() {
        let tmp = TempDir::new().unwrap();
        assert!(walk_all(tmp.path()).is_empty());
    }

    #[test]
    fn nonexistent_root_is_an_error() {
        let walker = DirectoryWalker::new("/definitely/does/not/exist", WalkerConfig::default());
        let err = walker.walk().unwrap_err();
        assert_eq!(err.code(), "AW-3002");
    }

    #[test]
    fn file_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not_a_dir.js");
        fs::write(&file, "x").unwrap();
        let err = DirectoryWalker::new(&file, WalkerConfig::default())
            .walk()
            .unwrap_err();
        assert_eq!(err.code(), "AW-2001");
    }

    #[test]
    fn respects_max_depth() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        fs::write(tmp.path().join("a/shallow.js"), "x").unwrap();
        fs::write(tmp.path().join("a/b/c/deep.js"), "x").unwrap();

        let mut config = WalkerConfig::default();
        config.max_depth = 1;
        let entries = DirectoryWalker::new(tmp.path(), config).walk().unwrap();
        let rel: Vec<_> = entries.iter().map(|e| e.relative.clone()).collect();
        assert!(rel.contains(&PathBuf::from("a/shallow.js")));
        assert!(!rel.contains(&PathBuf::from("a/b/c/deep.js")));
    }

    #[cfg(unix)]
    #[test]
    fn does_not_follow_symlinks_by_default() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("real")).unwrap();
        fs::write(tmp.path().join("real/file.js"), "x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let entries = walk_all(tmp.path());
        let rel: Vec<_> = entries.iter().map(|e| e.relative.clone()).collect();
        assert_eq!(rel, vec![PathBuf::from("real/file.js")]);
    }

    #[cfg(unix)]
    #[test]
    fn never_follows_symlink_escaping_root() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.js"), "getServerSideProps").unwrap();

        let tmp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();

        let mut config = WalkerConfig::default();
        config.follow_symlinks = true;
        let entries = DirectoryWalker::new(tmp.path(), config).walk().unwrap();
        assert!(
            entries.is_empty(),
            "escaping symlink must not be followed: {entries:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn follows_contained_symlinks_when_enabled() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("real")).unwrap();
        fs::write(tmp.path().join("real/file.js"), "x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("link")).unwrap();

        let mut config = WalkerConfig::default();
        config.follow_symlinks = true;
        let entries = DirectoryWalker::new(tmp.path(), config).walk().unwrap();
        let rel: Vec<_> = entries.iter().map(|e| e.relative.clone()).collect();
        assert!(rel.contains(&PathBuf::from("real/file.js")));
        assert!(rel.contains(&PathBuf::from("link/file.js")));
    }

    #[test]
    fn wide_directory_completes_with_single_worker() {
        // A frontier far wider than any internal queue sizing; a single
        // worker must still drain it without stalling.
        let tmp = TempDir::new().unwrap();
        for i in 0..4500 {
            let dir = tmp.path().join(format!("pkg{i:04}"));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("index.js"), "x").unwrap();
        }

        let mut config = WalkerConfig::default();
        config.parallelism = 1;
        let entries = DirectoryWalker::new(tmp.path(), config).walk().unwrap();
        assert_eq!(entries.len(), 4500);
    }

    #[test]
    fn repeated_walks_are_identical() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("api")).unwrap();
        fs::write(tmp.path().join("api/handler.js"), "x").unwrap();
        fs::write(tmp.path().join("page.js"), "y").unwrap();

        let first = walk_all(tmp.path());
        let second = walk_all(tmp.path());
        assert_eq!(first, second);
    }
}
