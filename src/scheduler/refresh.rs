//! Refresh job bodies
//!
//! [`RefreshContext`] bundles every collaborator a refresh touches. It is
//! shared (behind an `Arc`) between the scheduler thread, which only reads
//! the registry, and the worker threads that run [`RefreshContext::refresh_repo`].
//!
//! Remote refresh order, all under the alias's write lock:
//!
//! 0. confirm the alias is still registered
//! 1. compare the upstream revision with the published one
//! 2. sync the master and build every enabled index type against it
//! 3. snapshot the indexed master
//! 4. swap the alias to the snapshot
//!
//! The lock is released before the superseded snapshot is marked for
//! cleanup. Any failure before step 4 leaves the alias and the previous
//! snapshot exactly as they were.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alias::{AliasManager, AliasRecord};
use crate::cleanup::SnapshotCleanup;
use crate::config::{CloneKind, GoldenReposConfig};
use crate::error::{GoldenRepoError, Result};
use crate::fs_utils;
use crate::git::{GitUpstreamTracker, UpstreamTracker};
use crate::indexer::{CommandIndexBuilder, IndexBuilder, IndexType};
use crate::lock::{WriteLockCoordinator, WriteLockGuard};
use crate::probe::MasterProbe;
use crate::registry::{GlobalRegistry, GlobalRepoRecord};
use crate::snapshot::{CloneBackend, CopyCloner, ReflinkCloner, Snapshotter};

use super::outcome::{RefreshOutcome, RefreshStatus};

/// Lock owner label used by refresh jobs
pub const REFRESH_OWNER: &str = "refresh";

/// Tunables for refresh jobs
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Index types built on every changed refresh
    pub index_types: Vec<IndexType>,
    /// Bounded wait for an alias's write lock
    pub lock_timeout: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            index_types: Vec::new(),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a refresh or reconciliation needs
pub struct RefreshContext {
    pub aliases: AliasManager,
    pub registry: GlobalRegistry,
    /// Shared with any other writer of golden repo content
    pub locks: Arc<WriteLockCoordinator>,
    pub snapshotter: Snapshotter,
    pub indexer: Box<dyn IndexBuilder>,
    pub upstream: Box<dyn UpstreamTracker>,
    pub cleanup: SnapshotCleanup,
    pub probe: Box<dyn MasterProbe>,
    pub settings: RefreshSettings,
}

impl RefreshContext {
    /// Wire up the default collaborators from configuration
    pub fn from_config(config: &GoldenReposConfig) -> Result<Self> {
        let cloner: Box<dyn CloneBackend> = match config.snapshot.clone {
            CloneKind::Reflink => Box::new(ReflinkCloner),
            CloneKind::Copy => Box::new(CopyCloner),
        };

        Ok(Self {
            aliases: AliasManager::new(config.aliases_dir()),
            registry: GlobalRegistry::new(config.registry_dir()),
            locks: Arc::new(WriteLockCoordinator::new()),
            snapshotter: Snapshotter::new(config.versioned_dir(), cloner),
            indexer: Box::new(CommandIndexBuilder::new(config.indexing.index_commands()?)),
            upstream: Box::new(GitUpstreamTracker::new(config.refresh.branch.clone())),
            cleanup: SnapshotCleanup::new(config.snapshot_grace()),
            probe: config.reconcile.probe.build(),
            settings: RefreshSettings {
                index_types: config.indexing.enabled.clone(),
                lock_timeout: config.lock_timeout(),
            },
        })
    }

    /// Refresh one registered repo according to its classification
    pub fn refresh_repo(&self, record: &GlobalRepoRecord) -> Result<RefreshOutcome> {
        if record.kind().is_remote() {
            self.refresh_remote(record)
        } else {
            self.refresh_local(record)
        }
    }

    /// `Ok(None)` when another writer kept the lock past the timeout
    fn try_lock(&self, alias: &str) -> Result<Option<WriteLockGuard<'_>>> {
        match self
            .locks
            .lock(alias, REFRESH_OWNER, self.settings.lock_timeout)
        {
            Ok(guard) => Ok(Some(guard)),
            Err(GoldenRepoError::LockTimeout { .. }) => {
                tracing::info!(
                    "Write lock on {} busy (held by {:?}), retrying next cycle",
                    alias,
                    self.locks.holder(alias).map(|h| h.owner)
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Jobs carry the record from submission time. A repo unregistered since
    /// then must not be synced, indexed or republished.
    fn ensure_registered(&self, alias: &str) -> Result<()> {
        if self.registry.get_global_repo(alias)?.is_none() {
            tracing::info!("{} was unregistered before its refresh ran, skipping", alias);
            return Err(GoldenRepoError::NotFound {
                identifier: alias.to_string(),
            });
        }
        Ok(())
    }

    /// Refresh a remote-git repo: detect change, reindex, snapshot, swap
    pub fn refresh_remote(&self, record: &GlobalRepoRecord) -> Result<RefreshOutcome> {
        let started = Instant::now();
        let alias = record.alias.as_str();

        let Some(guard) = self.try_lock(alias)? else {
            return Ok(RefreshOutcome::new(
                alias,
                RefreshStatus::LockBusy,
                "write lock held by another writer",
            ));
        };
        self.ensure_registered(alias)?;

        let current = self.aliases.get_record(alias)?;
        let revision = self.upstream.remote_revision(&record.master_path)?;

        if let Some(current) = &current {
            if current.revision.as_deref() == Some(revision.as_str())
                && current.target_path.is_dir()
            {
                let touched = self.aliases.touch_alias(alias)?;
                tracing::debug!("{} unchanged at {}", alias, short_rev(&revision));
                let mut outcome = RefreshOutcome::new(
                    alias,
                    RefreshStatus::Unchanged,
                    format!("up to date at {}", short_rev(&revision)),
                );
                outcome.target_path = Some(touched.target_path);
                outcome.revision = Some(revision);
                outcome.elapsed = started.elapsed();
                return Ok(outcome);
            }
        }

        tracing::info!(
            "{} changed upstream: {:?} -> {}",
            alias,
            current.as_ref().and_then(|c| c.revision.as_deref()),
            short_rev(&revision)
        );

        self.upstream.sync_to(&record.master_path, &revision)?;
        let index_report = self
            .indexer
            .build(&record.master_path, &self.settings.index_types)?;
        let snapshot = self
            .snapshotter
            .create_snapshot(&record.repo_name, &record.master_path)?;

        let published = match self.publish(record, current.as_ref(), &snapshot.path, &revision) {
            Ok(published) => published,
            Err(e) => {
                if current.is_none() {
                    if let Err(rollback_err) = self.aliases.delete_alias(alias) {
                        tracing::warn!(
                            "Failed to roll back alias {} after failed publish: {}",
                            alias,
                            rollback_err
                        );
                    }
                }
                // Nobody can be reading a snapshot that was never published
                if let Err(cleanup_err) = fs_utils::remove_dir_if_exists(&snapshot.path) {
                    tracing::warn!(
                        "Failed to remove unpublished snapshot {}: {}",
                        snapshot.path.display(),
                        cleanup_err
                    );
                }
                return Err(e);
            }
        };
        drop(guard);

        let previous_target = current.map(|c| c.target_path);
        if let Some(previous) = &previous_target {
            if previous != &published.target_path && self.snapshotter.is_snapshot_path(previous) {
                self.cleanup.mark(previous);
            }
        }
        if let Err(e) = self.cleanup.sweep(&self.aliases) {
            tracing::warn!("Snapshot cleanup sweep failed: {}", e);
        }

        tracing::info!(
            "Published {} -> {} ({} index types in {}ms)",
            alias,
            published.target_path.display(),
            index_report.timings.len(),
            index_report.elapsed.as_millis()
        );

        let mut outcome = RefreshOutcome::new(
            alias,
            RefreshStatus::Updated,
            format!(
                "published {} at {}",
                snapshot.path.display(),
                short_rev(&revision)
            ),
        );
        outcome.target_path = Some(published.target_path);
        outcome.previous_target = previous_target;
        outcome.revision = Some(revision);
        outcome.elapsed = started.elapsed();
        Ok(outcome)
    }

    fn publish(
        &self,
        record: &GlobalRepoRecord,
        current: Option<&AliasRecord>,
        target: &Path,
        revision: &str,
    ) -> Result<AliasRecord> {
        if current.is_none() {
            self.aliases
                .create_alias(&record.alias, target, &record.repo_name)?;
        }
        self.aliases
            .update_alias_with_revision(&record.alias, target, revision)
    }

    /// Reindex a local repo in place. Never snapshots.
    pub fn refresh_local(&self, record: &GlobalRepoRecord) -> Result<RefreshOutcome> {
        let started = Instant::now();
        let alias = record.alias.as_str();
        let live = record.master_path.as_path();

        let Some(_guard) = self.try_lock(alias)? else {
            return Ok(RefreshOutcome::new(
                alias,
                RefreshStatus::LockBusy,
                "write lock held by another writer",
            ));
        };
        self.ensure_registered(alias)?;

        if !live.is_dir() {
            return Err(GoldenRepoError::AliasTargetMissing {
                alias: alias.to_string(),
                path: live.to_path_buf(),
            });
        }

        let report = self.indexer.build(live, &self.settings.index_types)?;

        let record = match self.aliases.get_record(alias)? {
            None => self.aliases.create_alias(alias, live, &record.repo_name)?,
            Some(existing) if existing.target_path != live => {
                tracing::warn!(
                    "Local alias {} pointed at {}, resetting to {}",
                    alias,
                    existing.target_path.display(),
                    live.display()
                );
                self.aliases.update_alias(alias, live)?
            }
            Some(_) => self.aliases.touch_alias(alias)?,
        };

        tracing::info!(
            "Reindexed local repo {} in place ({}ms)",
            alias,
            report.elapsed.as_millis()
        );

        let mut outcome = RefreshOutcome::new(
            alias,
            RefreshStatus::LocalReindexed,
            format!("reindexed {}", live.display()),
        );
        outcome.target_path = Some(record.target_path);
        outcome.elapsed = started.elapsed();
        Ok(outcome)
    }
}

fn short_rev(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}
