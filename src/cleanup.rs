//! Deferred deletion of superseded snapshots
//!
//! When an alias swaps to a new snapshot, readers that resolved the old
//! path a moment earlier may still be using it. The old snapshot is only
//! marked here; [`SnapshotCleanup::sweep`] deletes it once the grace period
//! has passed and no alias points at it any more.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::alias::AliasManager;
use crate::error::Result;
use crate::fs_utils;
use crate::snapshot::Snapshotter;

/// A snapshot waiting for deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupMark {
    pub path: PathBuf,
    pub marked_at: DateTime<Utc>,
}

/// What a sweep did
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Snapshot directories deleted
    pub removed: Vec<PathBuf>,
    /// Marks dropped because an alias points at the path again
    pub still_referenced: Vec<PathBuf>,
    /// Marks still inside their grace period
    pub pending: usize,
    /// Deletions that failed (kept for the next sweep)
    pub failed: Vec<(PathBuf, String)>,
}

/// Queue of snapshots marked for deferred deletion
pub struct SnapshotCleanup {
    grace: Duration,
    marks: Mutex<Vec<CleanupMark>>,
}

impl SnapshotCleanup {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            marks: Mutex::new(Vec::new()),
        }
    }

    /// Mark a superseded snapshot. Marking the same path twice keeps the first mark.
    pub fn mark(&self, path: &Path) {
        self.mark_at(path, Utc::now());
    }

    fn mark_at(&self, path: &Path, marked_at: DateTime<Utc>) -> bool {
        let mut marks = self.marks.lock();
        if marks.iter().any(|m| m.path == path) {
            return false;
        }
        tracing::debug!("Marked {} for deferred cleanup", path.display());
        marks.push(CleanupMark {
            path: path.to_path_buf(),
            marked_at,
        });
        true
    }

    /// Mark every snapshot of `repo_names` that no alias points at.
    ///
    /// Marks left by a previous process are lost on restart; this rebuilds
    /// them from disk. The grace period counts from snapshot creation.
    /// Returns how many new marks were added.
    pub fn mark_orphans(
        &self,
        snapshotter: &Snapshotter,
        repo_names: &[String],
        aliases: &AliasManager,
    ) -> Result<usize> {
        let referenced: Vec<PathBuf> = aliases
            .list_aliases()?
            .into_iter()
            .map(|r| r.target_path)
            .collect();

        let mut added = 0;
        for repo_name in repo_names {
            for snapshot in snapshotter.list_snapshots(repo_name)? {
                if referenced.contains(&snapshot.path) {
                    continue;
                }
                let created = snapshot.created_at().unwrap_or_else(Utc::now);
                if self.mark_at(&snapshot.path, created) {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    pub fn pending(&self) -> Vec<CleanupMark> {
        self.marks.lock().clone()
    }

    /// Delete expired, unreferenced marks as of now
    pub fn sweep(&self, aliases: &AliasManager) -> Result<SweepReport> {
        self.sweep_at(aliases, Utc::now())
    }

    /// Delete marks older than the grace period relative to `now`
    pub fn sweep_at(&self, aliases: &AliasManager, now: DateTime<Utc>) -> Result<SweepReport> {
        let referenced: Vec<PathBuf> = aliases
            .list_aliases()?
            .into_iter()
            .map(|r| r.target_path)
            .collect();
        let grace = chrono::Duration::from_std(self.grace)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));

        // Take the due marks out under the lock, delete without holding it
        let due: Vec<CleanupMark> = {
            let mut marks = self.marks.lock();
            let (due, keep): (Vec<_>, Vec<_>) = marks
                .drain(..)
                .partition(|m| now.signed_duration_since(m.marked_at) >= grace);
            *marks = keep;
            due
        };

        let mut report = SweepReport::default();
        let mut retry = Vec::new();
        for mark in due {
            if referenced.iter().any(|r| r == &mark.path) {
                tracing::info!(
                    "Snapshot {} is referenced again, not deleting",
                    mark.path.display()
                );
                report.still_referenced.push(mark.path);
                continue;
            }
            match fs_utils::remove_dir_if_exists(&mark.path) {
                Ok(_) => {
                    tracing::info!("Removed superseded snapshot {}", mark.path.display());
                    report.removed.push(mark.path);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove snapshot {}: {}", mark.path.display(), e);
                    report.failed.push((mark.path.clone(), e.to_string()));
                    retry.push(mark);
                }
            }
        }

        let mut marks = self.marks.lock();
        marks.extend(retry);
        report.pending = marks.len();
        Ok(report)
    }
}
