//! Startup reconciliation
//!
//! After a restart, or after someone deleted a master clone by hand, a
//! remote repo's master may be missing or unusable. It is restored from
//! the newest snapshot so the next refresh has something to fetch into.
//! Aliases are not touched: readers keep using the published snapshot.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{GoldenRepoError, Result};
use crate::registry::GlobalRepoRecord;
use crate::snapshot::VersionedSnapshot;

use super::outcome::ReconcileReport;
use super::refresh::RefreshContext;

/// Lock owner label used while restoring a master
pub const RECONCILE_OWNER: &str = "reconcile";

impl RefreshContext {
    /// Restore every remote repo whose master fails the configured probe.
    ///
    /// One repo's failure is logged and recorded; the others still run.
    /// Running it again with nothing changed restores nothing.
    pub fn reconcile_golden_repos(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for record in self.registry.list_global_repos()? {
            if !record.kind().is_remote() {
                report.skipped_local.push(record.alias);
                continue;
            }
            if self.probe.is_valid(&record.master_path) {
                report.healthy.push(record.alias);
                continue;
            }

            tracing::warn!(
                "Master for {} at {} failed the {} probe, restoring",
                record.alias,
                record.master_path.display(),
                self.probe.name()
            );
            match self.restore_master(&record) {
                Ok(snapshot) => {
                    tracing::info!(
                        "Restored {} from {}",
                        record.alias,
                        snapshot.path.display()
                    );
                    report.restored.push((record.alias, snapshot.path));
                }
                Err(e) => {
                    tracing::error!("Failed to reconcile {}: {}", record.alias, e);
                    report.failures.push((record.alias, e.to_string()));
                }
            }
        }

        tracing::info!(
            "Reconciliation: {} restored, {} healthy, {} local, {} failed",
            report.restored.len(),
            report.healthy.len(),
            report.skipped_local.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn restore_master(&self, record: &GlobalRepoRecord) -> Result<VersionedSnapshot> {
        let failure = |message: String| GoldenRepoError::ReconciliationFailure {
            alias: record.alias.clone(),
            message,
        };

        let _guard = self
            .locks
            .lock(&record.alias, RECONCILE_OWNER, self.settings.lock_timeout)
            .map_err(|e| failure(e.to_string()))?;

        let snapshot = self
            .snapshotter
            .latest_snapshot(&record.repo_name)
            .map_err(|e| failure(e.to_string()))?
            .ok_or_else(|| failure("no snapshot to restore from".to_string()))?;

        let master = record.master_path.as_path();
        if fs::symlink_metadata(master).is_ok() {
            let aside = set_aside(master).map_err(|e| failure(e.to_string()))?;
            tracing::warn!(
                "Moved invalid master {} aside to {}",
                master.display(),
                aside.display()
            );
        }

        self.snapshotter
            .restore(&snapshot, master)
            .map_err(|e| failure(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Rename an unusable master to `<master>.invalid-<millis>`
fn set_aside(master: &Path) -> Result<PathBuf> {
    let mut name = master.as_os_str().to_os_string();
    name.push(format!(".invalid-{}", Utc::now().timestamp_millis()));
    let aside = PathBuf::from(name);
    fs::rename(master, &aside).map_err(|e| GoldenRepoError::io(master, e))?;
    Ok(aside)
}
