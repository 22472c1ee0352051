//! golden-repos: lifecycle manager for server-side golden repositories
//!
//! A golden repo is a search-indexed mirror of a source repository. Readers
//! never look at a repo directly; they resolve its alias (`<name>-global`)
//! to a directory. For repos with a remote git origin that directory is an
//! immutable, versioned snapshot which is swapped atomically on refresh.
//! Local repos are served from their live directory and never snapshotted.
//!
//! # Components
//!
//! - [`classify`]: local vs remote-git origin
//! - [`alias`]: durable alias -> target mapping
//! - [`registry`]: catalog of managed repos and alias resolution
//! - [`lock`]: per-alias write locks shared by every writer
//! - [`snapshot`]: copy-on-write versioned snapshots
//! - [`scheduler`]: periodic and explicit refresh, startup reconciliation
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use golden_repos::{GoldenReposConfig, RefreshContext, RefreshScheduler, WorkerPool};
//!
//! let config = GoldenReposConfig::load()?;
//! let context = Arc::new(RefreshContext::from_config(&config)?);
//! let pool = Arc::new(WorkerPool::new(config.workers.threads)?);
//! let scheduler = Arc::new(RefreshScheduler::new(context, Some(pool), Arc::new(config)));
//!
//! scheduler.reconcile_golden_repos()?;
//! let handle = scheduler.start()?;
//! scheduler.trigger_refresh_for_repo("repo")?;
//! handle.stop();
//! ```

pub mod alias;
pub mod classify;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod error;
pub mod fs_utils;
pub mod git;
pub mod indexer;
pub mod jobs;
pub mod lock;
pub mod naming;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

// Re-export commonly used types
pub use alias::{AliasManager, AliasRecord};
pub use classify::{classify_origin, RepoKind};
pub use cleanup::{SnapshotCleanup, SweepReport};
pub use config::{FixedInterval, GoldenReposConfig, RefreshIntervalSource};
pub use error::{GoldenRepoError, Result};
pub use git::{GitUpstreamTracker, UpstreamTracker};
pub use indexer::{CommandIndexBuilder, IndexBuildReport, IndexBuilder, IndexType};
pub use jobs::{JobFn, JobId, JobQueue, JobStatus, WorkerPool, REFRESH_OPERATION};
pub use lock::{WriteLockCoordinator, WriteLockGuard};
pub use naming::{canonical_alias, validate_repo_name, CANONICAL_SUFFIX};
pub use probe::{ExistenceProbe, GitMarkerProbe, MasterProbe, ProbeKind};
pub use registry::{GlobalRegistry, GlobalRepoRecord};
pub use scheduler::{
    CancelSignal, ErrorPolicy, ReconcileReport, RefreshContext, RefreshOutcome,
    RefreshScheduler, RefreshStatus, SchedulerHandle, TickReport,
};
pub use snapshot::{CloneBackend, CopyCloner, ReflinkCloner, Snapshotter, VersionedSnapshot};
