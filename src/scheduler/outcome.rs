//! Refresh, tick and reconcile results

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::jobs::JobId;

/// How a single refresh attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// New snapshot built and published
    Updated,
    /// Upstream revision matched the published one; heartbeat only
    Unchanged,
    /// Another writer held the alias; retried next tick
    LockBusy,
    /// Local repo reindexed in place
    LocalReindexed,
}

impl RefreshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshStatus::Updated => "updated",
            RefreshStatus::Unchanged => "unchanged",
            RefreshStatus::LockBusy => "lock_busy",
            RefreshStatus::LocalReindexed => "local_reindexed",
        }
    }
}

impl std::fmt::Display for RefreshStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one refresh of one alias
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub alias: String,
    pub status: RefreshStatus,
    /// Target the alias points at after the refresh
    pub target_path: Option<PathBuf>,
    /// Target the alias pointed at before a swap
    pub previous_target: Option<PathBuf>,
    /// Upstream revision published (remote repos only)
    pub revision: Option<String>,
    pub detail: String,
    pub elapsed: Duration,
}

impl RefreshOutcome {
    pub fn new(alias: &str, status: RefreshStatus, detail: impl Into<String>) -> Self {
        Self {
            alias: alias.to_string(),
            status,
            target_path: None,
            previous_target: None,
            revision: None,
            detail: detail.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Whether the alias now serves current content
    pub fn success(&self) -> bool {
        !matches!(self.status, RefreshStatus::LockBusy)
    }
}

/// What one scheduled cycle did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// (alias, job id) for every job submitted this tick
    pub submitted: Vec<(String, JobId)>,
    /// Local repos skipped by classification
    pub skipped_local: Vec<String>,
    /// Remote repos whose previous job is still queued or running
    pub already_pending: Vec<String>,
    /// (alias, error) for submissions the queue rejected
    pub submit_failures: Vec<(String, String)>,
}

impl TickReport {
    pub fn submitted_aliases(&self) -> Vec<&str> {
        self.submitted.iter().map(|(alias, _)| alias.as_str()).collect()
    }
}

/// What a startup reconciliation pass did
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// (alias, snapshot restored from)
    pub restored: Vec<(String, PathBuf)>,
    /// Remote repos whose master passed the probe
    pub healthy: Vec<String>,
    pub skipped_local: Vec<String>,
    /// (alias, error)
    pub failures: Vec<(String, String)>,
}

impl ReconcileReport {
    /// True when the pass changed nothing on disk
    pub fn is_noop(&self) -> bool {
        self.restored.is_empty() && self.failures.is_empty()
    }
}

/// What the loop driver does when a tick fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log the error and wait for the next tick
    #[default]
    ContinueOnError,
}

impl ErrorPolicy {
    /// Whether the loop keeps going after a tick with this result
    pub fn should_continue<T, E>(self, _result: &std::result::Result<T, E>) -> bool {
        match self {
            ErrorPolicy::ContinueOnError => true,
        }
    }
}

/// Scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    jobs_submitted: AtomicU64,
    local_skips: AtomicU64,
    duplicate_suppressions: AtomicU64,
    tick_failures: AtomicU64,
}

/// Point-in-time copy of [`SchedulerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub jobs_submitted: u64,
    pub local_skips: u64,
    pub duplicate_suppressions: u64,
    pub tick_failures: u64,
}

impl SchedulerStats {
    pub(crate) fn record_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.local_skips
            .fetch_add(report.skipped_local.len() as u64, Ordering::Relaxed);
        self.duplicate_suppressions
            .fetch_add(report.already_pending.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_submission(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tick_failure(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.tick_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            local_skips: self.local_skips.load(Ordering::Relaxed),
            duplicate_suppressions: self.duplicate_suppressions.load(Ordering::Relaxed),
            tick_failures: self.tick_failures.load(Ordering::Relaxed),
        }
    }
}
