//! Post-unification batch cleanup.
//!
//! Once a deck is saved, the working batch directory holds intermediates the
//! deck no longer needs: rasterized pages, layout JSON, extraction records.
//! [`cleanup_batch`] deletes everything except the directories on the keep
//! list, then prunes oversized files from whatever survived. Cleanup is
//! best-effort; an undeletable file is logged and left behind, never an error.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::storage::{StoragePaths, QUESTIONS_DIR};

/// Directory names whose subtrees survive cleanup wherever they appear.
pub const KEEP_DIRS: [&str; 2] = [QUESTIONS_DIR, "images"];

/// What one cleanup pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSummary {
    pub files_deleted: usize,
    pub dirs_deleted: usize,
    /// Files over the size limit, removed even from kept directories.
    pub large_files_pruned: usize,
}

/// Remove intermediates from the batch directory, keeping [`KEEP_DIRS`]
/// subtrees, then prune files above `config.large_file_limit_mb` from the
/// remainder. The size limit applies inside kept directories too.
pub fn cleanup_batch(storage: &StoragePaths, config: &PipelineConfig) -> CleanupSummary {
    let mut summary = CleanupSummary::default();
    let root = storage.batch_root();
    if !root.is_dir() {
        return summary;
    }

    prune_dir(root, &mut summary);
    prune_large_files(root, config.large_file_limit_mb * 1024 * 1024, &mut summary);

    info!(
        "Cleaned batch {}: {} file(s), {} dir(s), {} oversized file(s) pruned",
        root.display(),
        summary.files_deleted,
        summary.dirs_deleted,
        summary.large_files_pruned
    );
    summary
}

/// Delete the contents of `dir` except kept subtrees. `dir` itself stays.
fn prune_dir(dir: &Path, summary: &mut CleanupSummary) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {} during cleanup: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = entry.file_name();
            if KEEP_DIRS.iter().any(|keep| name == *keep) {
                debug!("Keeping {}", path.display());
                continue;
            }
            prune_dir(&path, summary);
            // Fails while the directory still holds kept entries; that is
            // the signal to leave it in place.
            if fs::remove_dir(&path).is_ok() {
                summary.dirs_deleted += 1;
            }
        } else if let Err(e) = fs::remove_file(&path) {
            warn!("Cannot delete {} during cleanup: {}", path.display(), e);
        } else {
            summary.files_deleted += 1;
        }
    }
}

/// Remove every file larger than `limit_bytes` from the tree under `dir`.
fn prune_large_files(dir: &Path, limit_bytes: u64, summary: &mut CleanupSummary) {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {} during cleanup: {}", current.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(_) => continue,
            };
            if size <= limit_bytes {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    warn!(
                        "Pruned oversized file {} ({} bytes)",
                        path.display(),
                        size
                    );
                    summary.large_files_pruned += 1;
                }
                Err(e) => warn!("Cannot prune {}: {}", path.display(), e),
            }
        }
    }
}
